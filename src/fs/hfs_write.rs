//! Serialize an in-memory [`Volume`] into a fresh classic HFS image.
//!
//! Layout: boot blocks (sectors 0-1), MDB (sector 2), volume bitmap from
//! sector 3, then the allocation area starting on an `align` boundary. The
//! alternate MDB sits at `size - 1024`; the last sector is left reserved.
//!
//! Allocation is a single forward pass: extents-overflow file, catalog file,
//! then every fork as one contiguous extent. Nothing ever needs an overflow
//! extent, so the extents B-tree is written empty.
//!
//! With `desktop_db` set, the Finder `Desktop` file is regenerated from the
//! applications in the tree (see [`super::desktop`]).

use byteorder::{BigEndian, ByteOrder};
use log::debug;
use std::collections::HashSet;

use super::desktop::{self, DesktopApp};
use super::filesystem::FilesystemError;
use super::hfs::{
    HfsExtDescriptor, CATALOG_DIR, CATALOG_DIR_THREAD, CATALOG_FILE, HFS_SIGNATURE, MDB_OFFSET,
    MDB_SIZE,
};
use super::macroman::{compare_names, mac_roman_to_utf8, utf8_to_mac_roman};
use super::volume::{
    mac_now, CatalogInfo, File, Folder, Node, Volume, FIRST_USER_CNID, MAX_NAME,
    MAX_VOLUME_NAME, ROOT_CNID,
};

const SECTOR: u64 = 512;
const NODE_SIZE: usize = 512;
/// Volume bitmap starts at this sector.
const BITMAP_START_SECTOR: u64 = 3;
/// Nodes addressable by the map record in a 512-byte header node.
const MAX_BTREE_NODES: usize = 256 * 8;
const CATALOG_INDEX_KEY_LEN: u8 = 0x25;
const EXTENTS_KEY_LEN: u16 = 7;
const EXTENTS_FILE_NODES: usize = 8;
/// drAtrb bit 8: volume was cleanly unmounted.
const VOLUME_UNMOUNTED: u16 = 0x0100;
/// filFlags bit 1: a file thread record exists. We never write one.
const FILE_THREAD_FLAG: u16 = 0x02;

const ND_INDEX: u8 = 0x00;
const ND_HEADER: u8 = 0x01;
const ND_LEAF: u8 = 0xFF;

/// How an image is laid out on output.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Total image size in bytes; a multiple of 512.
    pub size: u64,
    /// Alignment of the allocation area and allocation block size.
    pub align: u64,
    /// Carry the volume's boot blocks into the image.
    pub bootable: bool,
    /// Regenerate the Finder desktop file.
    pub desktop_db: bool,
}

impl WriteOptions {
    /// Bootable output with a fresh desktop file.
    pub fn new(size: u64, align: u64) -> Self {
        WriteOptions {
            size,
            align,
            bootable: true,
            desktop_db: true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Layout {
    block_size: u32,
    first_alloc_sector: u16,
    total_blocks: u16,
    bitmap_sectors: u64,
}

fn plan_layout(size: u64, align: u64) -> Result<Layout, FilesystemError> {
    if size % SECTOR != 0 {
        return Err(FilesystemError::InvalidData(format!(
            "image size {size} is not a multiple of 512"
        )));
    }
    if align == 0 || align % SECTOR != 0 {
        return Err(FilesystemError::InvalidData(format!(
            "alignment {align} is not a non-zero multiple of 512"
        )));
    }

    let mut block_size = align;
    loop {
        let max_blocks = (size / block_size).min(u16::MAX as u64);
        let bitmap_sectors = max_blocks.div_ceil(SECTOR * 8).max(1);
        let alloc_start = ((BITMAP_START_SECTOR + bitmap_sectors) * SECTOR).next_multiple_of(align);
        if alloc_start + 2 * SECTOR >= size {
            return Err(FilesystemError::InvalidData(format!(
                "image size {size} is too small for an HFS volume"
            )));
        }
        let blocks = (size - alloc_start - 2 * SECTOR) / block_size;
        if blocks <= u16::MAX as u64 {
            if blocks == 0 || alloc_start / SECTOR > u16::MAX as u64 {
                return Err(FilesystemError::InvalidData(format!(
                    "image size {size} leaves no room for allocation blocks"
                )));
            }
            return Ok(Layout {
                block_size: block_size as u32,
                first_alloc_sector: (alloc_start / SECTOR) as u16,
                total_blocks: blocks as u16,
                bitmap_sectors,
            });
        }
        block_size += align;
    }
}

/// Bump allocator over allocation blocks.
struct Allocator {
    block_size: u32,
    total_blocks: u32,
    next_block: u32,
}

impl Allocator {
    /// Reserve a contiguous run of at least `bytes`; empty forks get no blocks.
    fn allocate(&mut self, bytes: u64, what: &str) -> Result<HfsExtDescriptor, FilesystemError> {
        let blocks = bytes.div_ceil(self.block_size as u64);
        if blocks == 0 {
            return Ok(HfsExtDescriptor::default());
        }
        if self.next_block as u64 + blocks > self.total_blocks as u64 {
            return Err(FilesystemError::DiskFull(format!(
                "{what} needs {blocks} block(s), {} of {} free",
                self.total_blocks - self.next_block,
                self.total_blocks
            )));
        }
        let ext = HfsExtDescriptor {
            start_block: self.next_block as u16,
            block_count: blocks as u16,
        };
        self.next_block += blocks as u32;
        Ok(ext)
    }

    fn physical_size(&self, ext: &HfsExtDescriptor) -> u32 {
        ext.block_count as u32 * self.block_size
    }
}

/// A node flattened out of the tree with its assigned ids.
struct Placed<'a> {
    cnid: u32,
    parent: u32,
    name: Vec<u8>,
    node: PlacedNode<'a>,
}

enum PlacedNode<'a> {
    Folder(&'a Folder),
    File(&'a File),
}

/// Flattens the tree, reusing stored CNIDs where they are valid and unique.
struct CnidAssigner {
    used: HashSet<u32>,
    next: u32,
}

impl CnidAssigner {
    fn new(root: &Folder, next_cnid: u32) -> Self {
        let mut max = 0;
        collect_max_cnid(root, &mut max);
        CnidAssigner {
            used: HashSet::new(),
            next: next_cnid.max(FIRST_USER_CNID).max(max.saturating_add(1)),
        }
    }

    fn assign(&mut self, info: &CatalogInfo) -> u32 {
        if let Some(id) = info.cnid {
            if id >= FIRST_USER_CNID && self.used.insert(id) {
                return id;
            }
        }
        loop {
            let id = self.next;
            self.next += 1;
            if self.used.insert(id) {
                return id;
            }
        }
    }
}

fn collect_max_cnid(folder: &Folder, max: &mut u32) {
    for (_, node) in folder.iter() {
        if let Some(id) = node.info().cnid {
            *max = (*max).max(id);
        }
        if let Node::Folder(f) = node {
            collect_max_cnid(f, max);
        }
    }
}

fn encode_name(name: &str) -> Result<Vec<u8>, FilesystemError> {
    let bytes = utf8_to_mac_roman(name);
    if bytes.is_empty() || bytes.len() > MAX_NAME {
        return Err(FilesystemError::InvalidData(format!(
            "name {name:?} must be 1-{MAX_NAME} bytes"
        )));
    }
    Ok(bytes)
}

fn flatten<'a>(
    folder: &'a Folder,
    cnid: u32,
    ids: &mut CnidAssigner,
    out: &mut Vec<Placed<'a>>,
) -> Result<(), FilesystemError> {
    for (name, node) in folder.iter() {
        let encoded = encode_name(name.as_str())?;
        let child_id = ids.assign(node.info());
        match node {
            Node::Folder(f) => {
                out.push(Placed {
                    cnid: child_id,
                    parent: cnid,
                    name: encoded,
                    node: PlacedNode::Folder(f),
                });
                flatten(f, child_id, ids, out)?;
            }
            Node::File(f) => out.push(Placed {
                cnid: child_id,
                parent: cnid,
                name: encoded,
                node: PlacedNode::File(f),
            }),
        }
    }
    Ok(())
}

/// One catalog leaf record before packing.
struct LeafRecord {
    parent: u32,
    name: Vec<u8>,
    data: Vec<u8>,
}

impl LeafRecord {
    /// Key bytes including the length byte.
    fn key_bytes(&self) -> Vec<u8> {
        // keyLen covers reserved + parent + Str31, padded so 1 + keyLen is even
        let len = self.name.len() + 1;
        let key_len = 5 + len + (len & 1);
        let mut key = vec![0u8; key_len + 1];
        key[0] = key_len as u8;
        BigEndian::write_u32(&mut key[2..6], self.parent);
        key[6] = self.name.len() as u8;
        key[7..7 + self.name.len()].copy_from_slice(&self.name);
        key
    }

    fn index_key(&self) -> [u8; 38] {
        let mut key = [0u8; 38];
        key[0] = CATALOG_INDEX_KEY_LEN;
        BigEndian::write_u32(&mut key[2..6], self.parent);
        key[6] = self.name.len() as u8;
        key[7..7 + self.name.len()].copy_from_slice(&self.name);
        key
    }

    fn packed(&self) -> Vec<u8> {
        let mut rec = self.key_bytes();
        rec.extend_from_slice(&self.data);
        rec
    }
}

fn dir_record(folder: &Folder, dir_id: u32) -> Result<Vec<u8>, FilesystemError> {
    let valence = u16::try_from(folder.len()).map_err(|_| {
        FilesystemError::InvalidData(format!("folder {dir_id} has more than 65535 entries"))
    })?;
    let info = &folder.info;
    let mut rec = vec![0u8; 70];
    rec[0] = CATALOG_DIR as u8;
    BigEndian::write_u16(&mut rec[2..4], info.flags);
    BigEndian::write_u16(&mut rec[4..6], valence);
    BigEndian::write_u32(&mut rec[6..10], dir_id);
    BigEndian::write_u32(&mut rec[10..14], info.create_date);
    BigEndian::write_u32(&mut rec[14..18], info.modify_date);
    BigEndian::write_u32(&mut rec[18..22], info.backup_date);
    rec[22..38].copy_from_slice(&info.finder_info);
    rec[38..54].copy_from_slice(&info.ext_finder_info);
    Ok(rec)
}

fn thread_record(parent: u32, name: &[u8]) -> Vec<u8> {
    let mut rec = vec![0u8; 46];
    rec[0] = CATALOG_DIR_THREAD as u8;
    BigEndian::write_u32(&mut rec[10..14], parent);
    rec[14] = name.len() as u8;
    rec[15..15 + name.len()].copy_from_slice(name);
    rec
}

struct ForkExtents {
    data: HfsExtDescriptor,
    rsrc: HfsExtDescriptor,
    /// Logical fork lengths.
    data_len: u32,
    rsrc_len: u32,
    block_size: u32,
}

impl ForkExtents {
    fn empty(block_size: u32) -> Self {
        ForkExtents {
            data: HfsExtDescriptor::default(),
            rsrc: HfsExtDescriptor::default(),
            data_len: 0,
            rsrc_len: 0,
            block_size,
        }
    }
}

fn file_record(file: &File, file_id: u32, forks: &ForkExtents) -> Vec<u8> {
    let info = &file.info;
    let mut rec = vec![0u8; 102];
    rec[0] = CATALOG_FILE as u8;
    rec[2] = (info.flags & !FILE_THREAD_FLAG) as u8;
    // FInfo with the type and creator laid over the stored Finder info
    rec[4..20].copy_from_slice(&info.finder_info);
    rec[4..8].copy_from_slice(&file.type_code.0);
    rec[8..12].copy_from_slice(&file.creator.0);
    BigEndian::write_u32(&mut rec[20..24], file_id);
    BigEndian::write_u16(&mut rec[24..26], forks.data.start_block);
    BigEndian::write_u32(&mut rec[26..30], forks.data_len);
    BigEndian::write_u32(
        &mut rec[30..34],
        forks.data.block_count as u32 * forks.block_size,
    );
    BigEndian::write_u16(&mut rec[34..36], forks.rsrc.start_block);
    BigEndian::write_u32(&mut rec[36..40], forks.rsrc_len);
    BigEndian::write_u32(
        &mut rec[40..44],
        forks.rsrc.block_count as u32 * forks.block_size,
    );
    BigEndian::write_u32(&mut rec[44..48], info.create_date);
    BigEndian::write_u32(&mut rec[48..52], info.modify_date);
    BigEndian::write_u32(&mut rec[52..56], info.backup_date);
    rec[56..72].copy_from_slice(&info.ext_finder_info);
    let extents = [
        forks.data,
        HfsExtDescriptor::default(),
        HfsExtDescriptor::default(),
    ];
    HfsExtDescriptor::write_record(&extents, &mut rec[74..86]);
    let extents = [
        forks.rsrc,
        HfsExtDescriptor::default(),
        HfsExtDescriptor::default(),
    ];
    HfsExtDescriptor::write_record(&extents, &mut rec[86..98]);
    rec
}

/// Assemble one B-tree node from its descriptor fields and packed records.
fn build_node(kind: u8, height: u8, flink: u32, blink: u32, records: &[Vec<u8>]) -> Vec<u8> {
    let mut node = vec![0u8; NODE_SIZE];
    BigEndian::write_u32(&mut node[0..4], flink);
    BigEndian::write_u32(&mut node[4..8], blink);
    node[8] = kind;
    node[9] = height;
    BigEndian::write_u16(&mut node[10..12], records.len() as u16);

    let mut offset = 14usize;
    for (i, rec) in records.iter().enumerate() {
        node[offset..offset + rec.len()].copy_from_slice(rec);
        let pos = NODE_SIZE - 2 * (i + 1);
        BigEndian::write_u16(&mut node[pos..pos + 2], offset as u16);
        offset += rec.len();
    }
    // Free-space offset follows the last record offset
    let pos = NODE_SIZE - 2 * (records.len() + 1);
    BigEndian::write_u16(&mut node[pos..pos + 2], offset as u16);
    node
}

/// Whether one more record of `len` bytes fits beside `used` bytes and `count` records.
fn fits(used: usize, count: usize, len: usize) -> bool {
    14 + used + len + 2 * (count + 2) <= NODE_SIZE
}

struct HeaderFields {
    depth: u16,
    root: u32,
    leaf_records: u32,
    first_leaf: u32,
    last_leaf: u32,
    key_len: u16,
    total_nodes: u32,
    used_nodes: u32,
}

fn header_node(h: &HeaderFields) -> Vec<u8> {
    let mut header = vec![0u8; 106];
    BigEndian::write_u16(&mut header[0..2], h.depth);
    BigEndian::write_u32(&mut header[2..6], h.root);
    BigEndian::write_u32(&mut header[6..10], h.leaf_records);
    BigEndian::write_u32(&mut header[10..14], h.first_leaf);
    BigEndian::write_u32(&mut header[14..18], h.last_leaf);
    BigEndian::write_u16(&mut header[18..20], NODE_SIZE as u16);
    BigEndian::write_u16(&mut header[20..22], h.key_len);
    BigEndian::write_u32(&mut header[22..26], h.total_nodes);
    BigEndian::write_u32(&mut header[26..30], h.total_nodes - h.used_nodes);

    let user = vec![0u8; 128];
    let mut map = vec![0u8; 256];
    for n in 0..h.used_nodes as usize {
        map[n / 8] |= 0x80 >> (n % 8);
    }
    build_node(ND_HEADER, 0, 0, 0, &[header, user, map])
}

/// Node count for a B-tree file holding `used` nodes, rounded to whole blocks.
fn btree_file_nodes(used: usize, wanted: usize, block_size: u32) -> Result<usize, FilesystemError> {
    let per_block = block_size as usize / NODE_SIZE;
    let max_blocks = MAX_BTREE_NODES / per_block;
    if used > MAX_BTREE_NODES || max_blocks == 0 {
        return Err(FilesystemError::Unsupported(format!(
            "B-tree of {used} nodes needs map nodes"
        )));
    }
    let nodes = wanted.max(used).div_ceil(per_block).min(max_blocks) * per_block;
    if nodes < used {
        return Err(FilesystemError::Unsupported(format!(
            "B-tree of {used} nodes needs map nodes"
        )));
    }
    Ok(nodes)
}

/// Build the catalog B-tree nodes (header, leaves, index levels).
///
/// Returns the nodes in file order; the caller pads to the file's size.
fn build_catalog(mut records: Vec<LeafRecord>) -> (Vec<Vec<u8>>, HeaderFields) {
    records.sort_by(|a, b| {
        a.parent
            .cmp(&b.parent)
            .then_with(|| compare_names(&a.name, &b.name))
    });

    // Pack leaves greedily
    let mut leaves: Vec<Vec<&LeafRecord>> = Vec::new();
    let mut current: Vec<&LeafRecord> = Vec::new();
    let mut used = 0usize;
    for rec in &records {
        let len = rec.packed().len();
        if !current.is_empty() && !fits(used, current.len(), len) {
            leaves.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(rec);
        used += len;
    }
    leaves.push(current);

    let leaf_count = leaves.len() as u32;
    let mut nodes: Vec<Vec<u8>> = Vec::new();
    for (i, leaf) in leaves.iter().enumerate() {
        let idx = i as u32 + 1;
        let flink = if idx < leaf_count { idx + 1 } else { 0 };
        let blink = if idx > 1 { idx - 1 } else { 0 };
        let packed: Vec<Vec<u8>> = leaf.iter().map(|r| r.packed()).collect();
        nodes.push(build_node(ND_LEAF, 1, flink, blink, &packed));
    }

    // Each level: (first key, node number)
    let mut level: Vec<([u8; 38], u32)> = leaves
        .iter()
        .enumerate()
        .map(|(i, leaf)| (leaf[0].index_key(), i as u32 + 1))
        .collect();
    let mut height = 1u8;
    let mut next_node = leaf_count + 1;

    // One index record is the 38-byte key plus a 4-byte child pointer
    let per_index = (NODE_SIZE - 14 - 2) / (38 + 4 + 2);
    while level.len() > 1 {
        height += 1;
        let chunks: Vec<&[([u8; 38], u32)]> = level.chunks(per_index).collect();
        let first = next_node;
        let count = chunks.len() as u32;
        let mut parent_level = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let idx = first + i as u32;
            let flink = if i as u32 + 1 < count { idx + 1 } else { 0 };
            let blink = if i > 0 { idx - 1 } else { 0 };
            let packed: Vec<Vec<u8>> = chunk
                .iter()
                .map(|(key, child)| {
                    let mut rec = key.to_vec();
                    rec.extend_from_slice(&child.to_be_bytes());
                    rec
                })
                .collect();
            nodes.push(build_node(ND_INDEX, height, flink, blink, &packed));
            parent_level.push((chunk[0].0, idx));
        }
        next_node += count;
        level = parent_level;
    }

    let header = HeaderFields {
        depth: height as u16,
        root: level[0].1,
        leaf_records: records.len() as u32,
        first_leaf: 1,
        last_leaf: leaf_count,
        key_len: CATALOG_INDEX_KEY_LEN as u16,
        total_nodes: 0,
        used_nodes: next_node,
    };
    (nodes, header)
}

/// Serialize `volume` into a new image according to `opts`.
pub fn write_volume(volume: &Volume, opts: &WriteOptions) -> Result<Vec<u8>, FilesystemError> {
    let layout = plan_layout(opts.size, opts.align)?;
    debug!(
        "layout: block_size={}, total_blocks={}, first_alloc_sector={}",
        layout.block_size, layout.total_blocks, layout.first_alloc_sector
    );

    let volume_name = utf8_to_mac_roman(&volume.name);
    if volume_name.is_empty() || volume_name.len() > MAX_VOLUME_NAME {
        return Err(FilesystemError::InvalidData(format!(
            "volume name {:?} must be 1-{MAX_VOLUME_NAME} bytes",
            volume.name
        )));
    }

    let prepared;
    let root = if opts.desktop_db {
        prepared = desktop::prepare_root(&volume.root);
        &prepared
    } else {
        &volume.root
    };

    let mut ids = CnidAssigner::new(root, volume.next_cnid);
    let mut placed = Vec::new();
    flatten(root, ROOT_CNID, &mut ids, &mut placed)?;

    // The desktop file lists applications by parent CNID, so it is built
    // only now and substituted for the placeholder's resource fork.
    let desktop_fork = if opts.desktop_db {
        desktop_placeholder(&placed).map(|cnid| (cnid, build_desktop_fork(&placed)))
    } else {
        None
    };

    // Catalog records: root dir + thread, then every node
    let mut records = vec![
        LeafRecord {
            parent: 1,
            name: volume_name.clone(),
            data: dir_record(root, ROOT_CNID)?,
        },
        LeafRecord {
            parent: ROOT_CNID,
            name: Vec::new(),
            data: thread_record(1, &volume_name),
        },
    ];

    // Forks are allocated after the B-tree files, whose size depends on the
    // record count but not on the fork extents. Size the catalog first.
    let record_count = 2 + placed.len()
        + placed
            .iter()
            .filter(|p| matches!(p.node, PlacedNode::Folder(_)))
            .count();

    let mut alloc = Allocator {
        block_size: layout.block_size,
        total_blocks: layout.total_blocks as u32,
        next_block: 0,
    };

    let extents_nodes = btree_file_nodes(1, EXTENTS_FILE_NODES, layout.block_size)?;
    let extents_ext = alloc.allocate((extents_nodes * NODE_SIZE) as u64, "extents file")?;

    // Placeholder extents encode to the same size as real ones, so a dry
    // build gives the exact node count.
    let forks_placeholder = ForkExtents::empty(layout.block_size);
    let mut dry = Vec::with_capacity(record_count);
    dry.extend(records.iter().map(|r| LeafRecord {
        parent: r.parent,
        name: r.name.clone(),
        data: r.data.clone(),
    }));
    for p in &placed {
        push_records(&mut dry, p, &forks_placeholder)?;
    }
    let (_, dry_header) = build_catalog(dry);
    let used = dry_header.used_nodes as usize;
    let catalog_nodes = btree_file_nodes(used, (used * 2).max(used + 16), layout.block_size)?;
    let catalog_ext = alloc.allocate((catalog_nodes * NODE_SIZE) as u64, "catalog file")?;

    // Fork data, in catalog order
    let mut fork_writes: Vec<(HfsExtDescriptor, &[u8])> = Vec::new();
    for p in &placed {
        let forks = match p.node {
            PlacedNode::File(file) => {
                let rsrc_bytes = match &desktop_fork {
                    Some((cnid, fork)) if *cnid == p.cnid => fork.as_slice(),
                    _ => file.rsrc.as_slice(),
                };
                let what = mac_roman_to_utf8(&p.name);
                let data = alloc.allocate(file.data.len() as u64, &what)?;
                let rsrc = alloc.allocate(rsrc_bytes.len() as u64, &what)?;
                fork_writes.push((data, file.data.as_slice()));
                fork_writes.push((rsrc, rsrc_bytes));
                ForkExtents {
                    data,
                    rsrc,
                    data_len: file.data.len() as u32,
                    rsrc_len: rsrc_bytes.len() as u32,
                    block_size: layout.block_size,
                }
            }
            PlacedNode::Folder(_) => ForkExtents::empty(layout.block_size),
        };
        push_records(&mut records, p, &forks)?;
    }

    let (catalog_tree, mut catalog_header) = build_catalog(records);
    catalog_header.total_nodes = catalog_nodes as u32;

    let extents_header = HeaderFields {
        depth: 0,
        root: 0,
        leaf_records: 0,
        first_leaf: 0,
        last_leaf: 0,
        key_len: EXTENTS_KEY_LEN,
        total_nodes: extents_nodes as u32,
        used_nodes: 1,
    };

    let mut image = vec![0u8; opts.size as usize];
    if opts.bootable {
        let n = volume.boot_blocks.len().min(MDB_OFFSET as usize);
        image[..n].copy_from_slice(&volume.boot_blocks[..n]);
    }

    let alloc_base = layout.first_alloc_sector as usize * SECTOR as usize;
    let block_offset =
        |ext: &HfsExtDescriptor| alloc_base + ext.start_block as usize * layout.block_size as usize;

    let at = block_offset(&extents_ext);
    image[at..at + NODE_SIZE].copy_from_slice(&header_node(&extents_header));

    let at = block_offset(&catalog_ext);
    image[at..at + NODE_SIZE].copy_from_slice(&header_node(&catalog_header));
    for (i, node) in catalog_tree.iter().enumerate() {
        let off = at + (i + 1) * NODE_SIZE;
        image[off..off + NODE_SIZE].copy_from_slice(node);
    }

    for (ext, bytes) in &fork_writes {
        if bytes.is_empty() {
            continue;
        }
        let at = block_offset(ext);
        image[at..at + bytes.len()].copy_from_slice(bytes);
    }

    // Volume bitmap: every allocated block is contiguous from block 0
    let bitmap_at = (BITMAP_START_SECTOR * SECTOR) as usize;
    for block in 0..alloc.next_block as usize {
        image[bitmap_at + block / 8] |= 0x80 >> (block % 8);
    }
    debug_assert!(alloc.next_block as u64 <= layout.bitmap_sectors * SECTOR * 8);

    let totals = Totals::count(&placed);
    let mdb = build_mdb(&MdbFields {
        volume,
        volume_name: &volume_name,
        layout: &layout,
        alloc: &alloc,
        next_cnid: ids.next,
        totals: &totals,
        extents_ext,
        catalog_ext,
    });
    let primary = MDB_OFFSET as usize;
    image[primary..primary + MDB_SIZE].copy_from_slice(&mdb);
    let alternate = opts.size as usize - 2 * SECTOR as usize;
    image[alternate..alternate + MDB_SIZE].copy_from_slice(&mdb);

    debug!(
        "wrote {} file(s), {} folder(s); {} of {} blocks used",
        totals.files, totals.dirs, alloc.next_block, layout.total_blocks
    );
    Ok(image)
}

/// CNID of the `Desktop` file left at the root by [`desktop::prepare_root`].
fn desktop_placeholder(placed: &[Placed<'_>]) -> Option<u32> {
    let name = utf8_to_mac_roman(desktop::DESKTOP_FILE);
    placed.iter().find_map(|p| match p.node {
        PlacedNode::File(f)
            if p.parent == ROOT_CNID && p.name == name && f.type_code == desktop::FINDER_TYPE =>
        {
            Some(p.cnid)
        }
        _ => None,
    })
}

fn build_desktop_fork(placed: &[Placed<'_>]) -> Vec<u8> {
    let apps: Vec<DesktopApp<'_>> = placed
        .iter()
        .filter_map(|p| match p.node {
            PlacedNode::File(file) if desktop::is_application(file) => Some(DesktopApp {
                parent: p.parent,
                name: &p.name,
                file,
            }),
            _ => None,
        })
        .collect();
    debug!("desktop file: {} application(s)", apps.len());
    desktop::build_desktop(&apps)
}

fn push_records(
    records: &mut Vec<LeafRecord>,
    p: &Placed<'_>,
    forks: &ForkExtents,
) -> Result<(), FilesystemError> {
    match p.node {
        PlacedNode::Folder(folder) => {
            records.push(LeafRecord {
                parent: p.parent,
                name: p.name.clone(),
                data: dir_record(folder, p.cnid)?,
            });
            records.push(LeafRecord {
                parent: p.cnid,
                name: Vec::new(),
                data: thread_record(p.parent, &p.name),
            });
        }
        PlacedNode::File(file) => records.push(LeafRecord {
            parent: p.parent,
            name: p.name.clone(),
            data: file_record(file, p.cnid, forks),
        }),
    }
    Ok(())
}

#[derive(Default)]
struct Totals {
    root_files: u16,
    root_dirs: u16,
    files: u32,
    dirs: u32,
}

impl Totals {
    fn count(placed: &[Placed<'_>]) -> Self {
        let mut t = Totals::default();
        for p in placed {
            let in_root = p.parent == ROOT_CNID;
            match p.node {
                PlacedNode::File(_) => {
                    t.files += 1;
                    if in_root {
                        t.root_files = t.root_files.saturating_add(1);
                    }
                }
                PlacedNode::Folder(_) => {
                    t.dirs += 1;
                    if in_root {
                        t.root_dirs = t.root_dirs.saturating_add(1);
                    }
                }
            }
        }
        t
    }
}

struct MdbFields<'a> {
    volume: &'a Volume,
    volume_name: &'a [u8],
    layout: &'a Layout,
    alloc: &'a Allocator,
    next_cnid: u32,
    totals: &'a Totals,
    extents_ext: HfsExtDescriptor,
    catalog_ext: HfsExtDescriptor,
}

fn build_mdb(m: &MdbFields<'_>) -> [u8; MDB_SIZE] {
    let mut d = [0u8; MDB_SIZE];
    let free = m.alloc.total_blocks - m.alloc.next_block;
    BigEndian::write_u16(&mut d[0..2], HFS_SIGNATURE);
    BigEndian::write_u32(&mut d[2..6], m.volume.create_date);
    BigEndian::write_u32(&mut d[6..10], mac_now());
    BigEndian::write_u16(&mut d[10..12], VOLUME_UNMOUNTED);
    BigEndian::write_u16(&mut d[12..14], m.totals.root_files);
    BigEndian::write_u16(&mut d[14..16], BITMAP_START_SECTOR as u16);
    BigEndian::write_u16(&mut d[16..18], m.alloc.next_block as u16);
    BigEndian::write_u16(&mut d[18..20], m.layout.total_blocks);
    BigEndian::write_u32(&mut d[20..24], m.layout.block_size);
    BigEndian::write_u32(&mut d[24..28], m.layout.block_size * 4);
    BigEndian::write_u16(&mut d[28..30], m.layout.first_alloc_sector);
    BigEndian::write_u32(&mut d[30..34], m.next_cnid);
    BigEndian::write_u16(&mut d[34..36], free as u16);
    d[36] = m.volume_name.len() as u8;
    d[37..37 + m.volume_name.len()].copy_from_slice(m.volume_name);
    BigEndian::write_u32(&mut d[64..68], m.volume.backup_date);
    BigEndian::write_u32(&mut d[70..74], m.volume.write_count.wrapping_add(1));
    let extents_size = m.alloc.physical_size(&m.extents_ext);
    let catalog_size = m.alloc.physical_size(&m.catalog_ext);
    BigEndian::write_u32(&mut d[74..78], extents_size);
    BigEndian::write_u32(&mut d[78..82], catalog_size);
    BigEndian::write_u16(&mut d[82..84], m.totals.root_dirs);
    BigEndian::write_u32(&mut d[84..88], m.totals.files);
    BigEndian::write_u32(&mut d[88..92], m.totals.dirs);
    d[92..124].copy_from_slice(&m.volume.finder_info);
    BigEndian::write_u32(&mut d[130..134], extents_size);
    HfsExtDescriptor::write_record(
        &[
            m.extents_ext,
            HfsExtDescriptor::default(),
            HfsExtDescriptor::default(),
        ],
        &mut d[134..146],
    );
    BigEndian::write_u32(&mut d[146..150], catalog_size);
    HfsExtDescriptor::write_record(
        &[
            m.catalog_ext,
            HfsExtDescriptor::default(),
            HfsExtDescriptor::default(),
        ],
        &mut d[150..162],
    );
    d
}

impl Volume {
    /// Serialize into a new image.
    pub fn write(&self, opts: &WriteOptions) -> Result<Vec<u8>, FilesystemError> {
        write_volume(self, opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::desktop::tests::sample_app;
    use crate::fs::hfs::{for_each_leaf_record, HfsMasterDirectoryBlock};
    use crate::fs::resource_fork::ResourceFork;
    use crate::fs::volume::FourCC;

    fn opts(size: u64) -> WriteOptions {
        WriteOptions {
            desktop_db: false,
            ..WriteOptions::new(size, 512)
        }
    }

    /// Catalog bytes of a written image.
    fn catalog_of(image: &[u8]) -> &[u8] {
        let mdb = HfsMasterDirectoryBlock::parse(&image[1024..1024 + MDB_SIZE]).unwrap();
        let at = mdb.first_alloc_block as usize * 512
            + mdb.catalog_file_extents[0].start_block as usize * mdb.block_size as usize;
        &image[at..at + mdb.catalog_file_size as usize]
    }

    fn text_file(data: &[u8]) -> Node {
        File::new(data.to_vec(), FourCC::TEXT, FourCC(*b"ttxt")).into()
    }

    #[test]
    fn test_layout_small_image() {
        let layout = plan_layout(800 * 1024, 512).unwrap();
        assert_eq!(layout.block_size, 512);
        assert_eq!(layout.first_alloc_sector, 4);
        assert_eq!(layout.total_blocks, 1594);
    }

    #[test]
    fn test_layout_grows_block_size() {
        let layout = plan_layout(64 * 1024 * 1024, 512).unwrap();
        assert!(layout.total_blocks as u64 * layout.block_size as u64 <= 64 * 1024 * 1024);
        assert_eq!(layout.block_size % 512, 0);
        assert!(layout.block_size > 512);
    }

    #[test]
    fn test_layout_respects_alignment() {
        let layout = plan_layout(8 * 1024 * 1024, 2048).unwrap();
        assert_eq!(layout.first_alloc_sector as u64 * 512 % 2048, 0);
        assert_eq!(layout.block_size % 2048, 0);
    }

    #[test]
    fn test_layout_rejects_bad_sizes() {
        assert!(plan_layout(1000, 512).is_err());
        assert!(plan_layout(1024 * 1024, 1000).is_err());
        assert!(plan_layout(1024 * 1024, 0).is_err());
        assert!(plan_layout(2048, 512).is_err());
    }

    #[test]
    fn test_empty_volume_round_trip() {
        let vol = Volume::new("Blank");
        let image = vol.write(&opts(400 * 1024)).unwrap();
        assert_eq!(image.len(), 400 * 1024);

        let back = Volume::read(&image).unwrap();
        assert_eq!(back.name, "Blank");
        assert!(back.root.is_empty());
        assert_eq!(back.write_count, 1);
    }

    #[test]
    fn test_alternate_mdb_matches_primary() {
        let image = Volume::new("Alt").write(&opts(400 * 1024)).unwrap();
        let alt = image.len() - 1024;
        assert_eq!(&image[1024..1024 + MDB_SIZE], &image[alt..alt + MDB_SIZE]);
    }

    #[test]
    fn test_tree_round_trip() {
        let mut vol = Volume::new("Tree");
        let mut sub = Folder::new();
        sub.insert("deep.txt", text_file(b"deep contents"));
        let mut rsrc_file = File::new(b"data".to_vec(), FourCC(*b"APPL"), FourCC(*b"RWar"));
        rsrc_file.rsrc = vec![7u8; 1500];
        sub.insert("App", rsrc_file.into());
        vol.root.insert("Sub Folder", sub.into());
        vol.root.insert("top.txt", text_file(b"top"));

        let image = vol.write(&opts(800 * 1024)).unwrap();
        let back = Volume::read(&image).unwrap();

        let top = back.root.get("top.txt").and_then(Node::as_file).unwrap();
        assert_eq!(top.data, b"top");
        assert_eq!(top.type_code, FourCC::TEXT);
        assert_eq!(top.creator, FourCC(*b"ttxt"));

        let sub = back.root.get("sub folder").and_then(Node::as_folder).unwrap();
        let deep = sub.get("deep.txt").and_then(Node::as_file).unwrap();
        assert_eq!(deep.data, b"deep contents");
        let app = sub.get("App").and_then(Node::as_file).unwrap();
        assert_eq!(app.rsrc, vec![7u8; 1500]);
        assert_eq!(app.type_code, FourCC(*b"APPL"));
    }

    #[test]
    fn test_cnids_are_preserved_on_rewrite() {
        let mut vol = Volume::new("Ids");
        vol.root.insert("System Folder", Folder::new().into());
        let first = Volume::read(&vol.write(&opts(400 * 1024)).unwrap()).unwrap();
        let id = first.root.get("System Folder").unwrap().info().cnid.unwrap();

        let mut second = first.clone();
        second.root.insert("Another", Folder::new().into());
        let reread = Volume::read(&second.write(&opts(400 * 1024)).unwrap()).unwrap();
        assert_eq!(reread.root.get("System Folder").unwrap().info().cnid, Some(id));
        let other = reread.root.get("Another").unwrap().info().cnid.unwrap();
        assert_ne!(other, id);
        assert!(other >= FIRST_USER_CNID);
    }

    #[test]
    fn test_many_files_build_index_nodes() {
        let mut vol = Volume::new("Many");
        for i in 0..400 {
            vol.root.insert(&format!("file {i:03}"), text_file(b"x"));
        }
        let image = vol.write(&opts(2 * 1024 * 1024)).unwrap();

        let catalog = catalog_of(&image);
        let depth = BigEndian::read_u16(&catalog[14..16]);
        assert!(depth >= 2, "expected index levels, depth {depth}");

        let back = Volume::read(&image).unwrap();
        assert_eq!(back.root.len(), 400);
        assert!(back.root.contains("FILE 399"));
    }

    #[test]
    fn test_leaf_keys_follow_hfs_order() {
        let mut vol = Volume::new("Order");
        for name in ["Zebra", "Äpfel", "banana", "Apfel", "Robots·2", "Robots2", "ß"] {
            vol.root.insert(name, text_file(b"x"));
        }
        let image = vol.write(&opts(400 * 1024)).unwrap();

        let mut keys: Vec<(u32, Vec<u8>)> = Vec::new();
        for_each_leaf_record(catalog_of(&image), |key, _| {
            let name_len = key[5] as usize;
            // 1 + keyLen stays even; short names pad to the next word
            assert_eq!((1 + key.len()) % 2, 0, "keyLen {}", key.len());
            assert_eq!(key.len(), 6 + name_len + (1 - name_len % 2));
            keys.push((BigEndian::read_u32(&key[1..5]), key[6..6 + name_len].to_vec()));
        })
        .unwrap();

        for pair in keys.windows(2) {
            let order = pair[0]
                .0
                .cmp(&pair[1].0)
                .then_with(|| compare_names(&pair[0].1, &pair[1].1));
            assert_eq!(order, std::cmp::Ordering::Less, "{pair:?}");
        }
        let root_names: Vec<String> = keys
            .iter()
            .filter(|(parent, _)| *parent == ROOT_CNID)
            .map(|(_, name)| mac_roman_to_utf8(name))
            .collect();
        assert_eq!(
            root_names,
            vec!["", "Apfel", "Äpfel", "banana", "Robots2", "Robots·2", "ß", "Zebra"]
        );
    }

    #[test]
    fn test_desktop_file_is_regenerated() {
        let mut vol = Volume::new("Desk");
        vol.root.insert(
            "Desktop DB",
            File::new(vec![9; 64], FourCC(*b"BTFL"), FourCC(*b"DMGR")).into(),
        );
        let mut games = Folder::new();
        games.insert("Robot Warriors", sample_app(b"RWar").into());
        vol.root.insert("Games", games.into());

        let image = vol.write(&WriteOptions::new(800 * 1024, 512)).unwrap();
        let back = Volume::read(&image).unwrap();
        assert!(!back.root.contains("Desktop DB"));

        let desk = back.root.get(desktop::DESKTOP_FILE).and_then(Node::as_file).unwrap();
        assert_eq!(desk.type_code, desktop::FINDER_TYPE);
        assert_eq!(desk.creator, desktop::FINDER_CREATOR);
        let flags = BigEndian::read_u16(&desk.info.finder_info[8..10]);
        assert_ne!(flags & desktop::FLAG_INVISIBLE, 0);

        let fork = ResourceFork::parse(&desk.rsrc).unwrap();
        assert!(fork.get(FourCC(*b"BNDL"), 128).is_some());
        assert!(fork.get(FourCC(*b"ICN#"), 128).is_some());
        let appl = &fork.get(FourCC(*b"APPL"), 0).unwrap().data;
        assert_eq!(&appl[0..4], b"RWar");
        let games_id = back.root.get("Games").unwrap().info().cnid.unwrap();
        assert_eq!(BigEndian::read_u32(&appl[4..8]), games_id);

        // Rewriting keeps the desktop file's CNID
        let desk_id = desk.info.cnid;
        let again = Volume::read(&back.write(&WriteOptions::new(800 * 1024, 512)).unwrap()).unwrap();
        assert_eq!(again.root.get(desktop::DESKTOP_FILE).unwrap().info().cnid, desk_id);
    }

    #[test]
    fn test_desktop_generation_can_be_disabled() {
        let mut vol = Volume::new("Plain");
        vol.root.insert("Desktop DB", text_file(b"stale"));
        let back = Volume::read(&vol.write(&opts(400 * 1024)).unwrap()).unwrap();
        assert!(back.root.contains("Desktop DB"));
        assert!(!back.root.contains(desktop::DESKTOP_FILE));
    }

    #[test]
    fn test_disk_full() {
        let mut vol = Volume::new("Tiny");
        vol.root.insert("big", text_file(&vec![0u8; 600 * 1024]));
        assert!(matches!(
            vol.write(&opts(400 * 1024)),
            Err(FilesystemError::DiskFull(_))
        ));
    }

    #[test]
    fn test_boot_blocks_follow_bootable_flag() {
        let mut vol = Volume::new("Boot");
        vol.boot_blocks[0..2].copy_from_slice(b"LK");

        let image = vol.write(&opts(400 * 1024)).unwrap();
        assert_eq!(&image[0..2], b"LK");
        assert_eq!(Volume::read(&image).unwrap().boot_blocks[0..2], *b"LK");

        let mut plain = opts(400 * 1024);
        plain.bootable = false;
        let image = vol.write(&plain).unwrap();
        assert_eq!(&image[0..2], &[0, 0]);
    }

    #[test]
    fn test_rejects_long_names() {
        let mut vol = Volume::new("Names");
        vol.root.insert(&"n".repeat(40), text_file(b""));
        assert!(matches!(
            vol.write(&opts(400 * 1024)),
            Err(FilesystemError::InvalidData(_))
        ));

        let vol = Volume::new("This volume name is far too long");
        assert!(vol.write(&opts(400 * 1024)).is_err());
    }
}
