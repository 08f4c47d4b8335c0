use log::debug;

use super::name::normalize;
use crate::error::InjectError;
use crate::fs::volume::{Folder, Node};

/// Walk `components` down from `root`, creating missing folders, and return
/// the deepest one.
///
/// Existing folders are reused, so calling this repeatedly with overlapping
/// prefixes is cheap and creates nothing twice. A component already occupied
/// by a file is a [`InjectError::PathConflict`]. Creation only starts past the
/// last existing component, so a conflict always leaves the tree untouched.
pub fn ensure_folder<'a, S: AsRef<str>>(
    root: &'a mut Folder,
    components: &[S],
    max_name_len: usize,
) -> Result<&'a mut Folder, InjectError> {
    let mut current = root;
    let mut walked: Vec<String> = Vec::with_capacity(components.len());

    for component in components {
        let name = normalize(component.as_ref(), max_name_len);
        walked.push(name.clone());

        if !current.contains(&name) {
            debug!("creating folder {}", walked.join(":"));
            current.insert(&name, Node::Folder(Folder::new()));
        }

        current = match current.get_mut(&name) {
            Some(Node::Folder(folder)) => folder,
            _ => {
                return Err(InjectError::PathConflict {
                    component: name,
                    path: walked.join("/"),
                })
            }
        };
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::volume::{File, FourCC};

    const MAX: usize = 31;

    fn text(data: &[u8]) -> Node {
        Node::File(File::new(data.to_vec(), FourCC::TEXT, FourCC::TEXT))
    }

    #[test]
    fn test_empty_path_returns_root() {
        let mut root = Folder::new();
        root.insert("keep", text(b"x"));
        let folder = ensure_folder::<&str>(&mut root, &[], MAX).unwrap();
        assert!(folder.contains("keep"));
    }

    #[test]
    fn test_creates_nested_folders() {
        let mut root = Folder::new();
        ensure_folder(&mut root, &["Desktop Folder", "Robot Warriors", "robots"], MAX).unwrap();

        let desktop = root.get("Desktop Folder").and_then(Node::as_folder).unwrap();
        let game = desktop.get("Robot Warriors").and_then(Node::as_folder).unwrap();
        assert!(game.get("robots").unwrap().is_folder());
    }

    #[test]
    fn test_idempotent() {
        let mut root = Folder::new();
        ensure_folder(&mut root, &["X", "Y"], MAX)
            .unwrap()
            .insert("marker", text(b"m"));

        let again = ensure_folder(&mut root, &["X", "Y"], MAX).unwrap();
        assert!(again.contains("marker"));
        assert_eq!(again.len(), 1);

        assert_eq!(root.len(), 1);
        assert_eq!(root.folder_count(), 2);
    }

    #[test]
    fn test_reuses_template_folder_case_insensitively() {
        let mut root = Folder::new();
        let mut existing = Folder::new();
        existing.insert("Game", text(b"app"));
        root.insert("Desktop Folder", existing.into());

        let folder = ensure_folder(&mut root, &["desktop folder"], MAX).unwrap();
        assert!(folder.contains("Game"));
        let names: Vec<&str> = root.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["Desktop Folder"]);
    }

    #[test]
    fn test_components_are_normalized() {
        let mut root = Folder::new();
        ensure_folder(&mut root, &["a:b"], MAX).unwrap();
        assert!(root.contains("a·b"));
    }

    #[test]
    fn test_file_in_the_way_is_conflict() {
        let mut root = Folder::new();
        let mut x = Folder::new();
        x.insert("Y", text(b"not a folder"));
        root.insert("X", x.into());

        let err = ensure_folder(&mut root, &["X", "Y", "Z"], MAX).unwrap_err();
        match err {
            InjectError::PathConflict { component, path } => {
                assert_eq!(component, "Y");
                assert_eq!(path, "X/Y");
            }
            other => panic!("unexpected error: {other}"),
        }

        // Nothing was created under the conflicting prefix
        let x = root.get("X").and_then(Node::as_folder).unwrap();
        assert_eq!(x.len(), 1);
        assert!(x.get("Y").unwrap().as_file().is_some());
        assert_eq!(root.folder_count(), 1);
    }
}
