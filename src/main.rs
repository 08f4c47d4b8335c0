mod cli;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Args;
use log::info;

use hfs_inject::fs::Volume;
use hfs_inject::inject::{mirror, write_image};
use hfs_inject::InjectError;

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .format_timestamp(None)
        .format_target(false)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<InjectError>()
                .map(InjectError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run(args: &Args) -> Result<()> {
    if !args.template.is_file() {
        return Err(InjectError::NotFound {
            what: "Template image",
            path: args.template.clone(),
        }
        .into());
    }
    if !args.source.is_dir() {
        return Err(InjectError::NotFound {
            what: "Source directory",
            path: args.source.clone(),
        }
        .into());
    }

    let template = std::fs::read(&args.template)
        .map_err(InjectError::from)
        .with_context(|| format!("reading template {}", args.template.display()))?;
    let mut volume = Volume::read(&template)
        .map_err(InjectError::from)
        .with_context(|| format!("loading template {}", args.template.display()))?;
    info!(
        "loaded volume '{}': {} file(s), {} folder(s)",
        volume.name,
        volume.root.file_count(),
        volume.root.folder_count()
    );
    if let Some(name) = &args.volume_name {
        volume.name = name.clone();
    }

    let target = args.target_components();
    let count = mirror(&mut volume.root, &target, &args.source, &args.mirror_options())?;

    let image = volume
        .write(&args.write_options())
        .map_err(InjectError::from)
        .context("building output image")?;
    write_image(&args.out, &image)
        .with_context(|| format!("writing {}", args.out.display()))?;

    println!("Injected {count} file(s) into '{}'", target.join("/"));
    println!("Wrote: {}", args.out.display());
    Ok(())
}
