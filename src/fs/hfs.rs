use byteorder::{BigEndian, ByteOrder};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read, Seek, SeekFrom};

use super::filesystem::FilesystemError;
use super::macroman::mac_roman_to_utf8;
use super::volume::{CatalogInfo, File, Folder, FourCC, Node, Volume, ROOT_CNID};

pub(crate) const HFS_SIGNATURE: u16 = 0x4244;
const HFS_PLUS_EMBEDDED_SIGNATURE: u16 = 0x482B;

/// Byte offset of the MDB (and size of the boot-block area before it).
pub(crate) const MDB_OFFSET: u64 = 1024;
pub(crate) const MDB_SIZE: usize = 162;

/// Reserved CNID of the catalog file.
const CATALOG_FILE_CNID: u32 = 4;

/// Fork type bytes used in extents-overflow keys.
pub(crate) const FORK_DATA: u8 = 0x00;
pub(crate) const FORK_RSRC: u8 = 0xFF;

/// HFS extent descriptor: start_block (u16) + block_count (u16).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct HfsExtDescriptor {
    pub start_block: u16,
    pub block_count: u16,
}

impl HfsExtDescriptor {
    fn parse(data: &[u8]) -> Self {
        HfsExtDescriptor {
            start_block: BigEndian::read_u16(&data[0..2]),
            block_count: BigEndian::read_u16(&data[2..4]),
        }
    }

    fn parse_record(data: &[u8]) -> [HfsExtDescriptor; 3] {
        let mut record = [HfsExtDescriptor::default(); 3];
        for (i, ext) in record.iter_mut().enumerate() {
            *ext = HfsExtDescriptor::parse(&data[i * 4..i * 4 + 4]);
        }
        record
    }

    pub(crate) fn write_record(record: &[HfsExtDescriptor; 3], out: &mut [u8]) {
        for (i, ext) in record.iter().enumerate() {
            BigEndian::write_u16(&mut out[i * 4..i * 4 + 2], ext.start_block);
            BigEndian::write_u16(&mut out[i * 4 + 2..i * 4 + 4], ext.block_count);
        }
    }
}

/// HFS Master Directory Block (MDB) — at offset 1024.
#[derive(Debug)]
pub(crate) struct HfsMasterDirectoryBlock {
    pub create_date: u32,
    pub total_blocks: u16,
    pub block_size: u32,
    pub volume_name: String,
    /// First allocation block's offset in 512-byte sectors from volume start.
    pub first_alloc_block: u16,
    pub next_cnid: u32,
    pub backup_date: u32,
    pub write_count: u32,
    pub finder_info: [u8; 32],
    pub catalog_file_size: u32,
    pub catalog_file_extents: [HfsExtDescriptor; 3],
    pub extents_file_size: u32,
    pub extents_file_extents: [HfsExtDescriptor; 3],
    pub embedded_signature: u16,
}

impl HfsMasterDirectoryBlock {
    pub(crate) fn parse(data: &[u8]) -> Result<Self, FilesystemError> {
        if data.len() < MDB_SIZE {
            return Err(FilesystemError::Parse("MDB too short".into()));
        }
        let sig = BigEndian::read_u16(&data[0..2]);
        if sig != HFS_SIGNATURE {
            return Err(FilesystemError::Parse(format!(
                "bad MDB signature: 0x{sig:04X}"
            )));
        }

        // Volume name: Pascal string at offset 36 (length byte + up to 27 chars)
        let name_len = data[36] as usize;
        let name_bytes = &data[37..37 + name_len.min(27)];
        let volume_name = mac_roman_to_utf8(name_bytes);

        let mut finder_info = [0u8; 32];
        finder_info.copy_from_slice(&data[92..124]);

        Ok(HfsMasterDirectoryBlock {
            create_date: BigEndian::read_u32(&data[2..6]),
            total_blocks: BigEndian::read_u16(&data[18..20]),
            block_size: BigEndian::read_u32(&data[20..24]),
            volume_name,
            first_alloc_block: BigEndian::read_u16(&data[28..30]),
            next_cnid: BigEndian::read_u32(&data[30..34]),
            backup_date: BigEndian::read_u32(&data[64..68]),
            write_count: BigEndian::read_u32(&data[70..74]),
            finder_info,
            extents_file_size: BigEndian::read_u32(&data[130..134]),
            extents_file_extents: HfsExtDescriptor::parse_record(&data[134..146]),
            catalog_file_size: BigEndian::read_u32(&data[146..150]),
            catalog_file_extents: HfsExtDescriptor::parse_record(&data[150..162]),
            // Embedded HFS+ info at offsets 124-130
            embedded_signature: BigEndian::read_u16(&data[124..126]),
        })
    }

    /// True if this MDB wraps an embedded HFS+ volume.
    fn has_embedded_hfs_plus(&self) -> bool {
        self.embedded_signature == HFS_PLUS_EMBEDDED_SIGNATURE
    }
}

/// Catalog record types.
pub(crate) const CATALOG_DIR: i8 = 1;
pub(crate) const CATALOG_FILE: i8 = 2;
pub(crate) const CATALOG_DIR_THREAD: i8 = 3;

/// A parsed HFS catalog record.
#[derive(Debug, Clone)]
enum CatalogRecord {
    Directory {
        dir_id: u32,
        name: String,
        info: CatalogInfo,
    },
    File {
        file_id: u32,
        name: String,
        type_code: FourCC,
        creator: FourCC,
        data_size: u32,
        data_extents: [HfsExtDescriptor; 3],
        rsrc_size: u32,
        rsrc_extents: [HfsExtDescriptor; 3],
        info: CatalogInfo,
    },
}

/// Overflow extents keyed by (file id, fork type), sorted by first file block.
type OverflowMap = HashMap<(u32, u8), Vec<(u16, [HfsExtDescriptor; 3])>>;

/// Visit every leaf record of an in-memory B-tree file as (key, data) slices.
///
/// `key` excludes the key-length byte; `data` starts at the even-aligned
/// record body and runs to the end of the node.
pub(crate) fn for_each_leaf_record(
    btree: &[u8],
    mut visit: impl FnMut(&[u8], &[u8]),
) -> Result<(), FilesystemError> {
    if btree.len() < 512 {
        return Ok(());
    }

    // Node descriptor: 14 bytes, then BTHeaderRec starts
    // BTHeaderRec: treeDepth(2) + rootNode(4) + leafRecords(4) + firstLeafNode(4) + ...
    let node_size = BigEndian::read_u16(&btree[32..34]) as usize;
    if node_size < 512 || btree.len() < node_size {
        return Err(FilesystemError::Parse(format!(
            "bad B-tree node size {node_size}"
        )));
    }
    let first_leaf = BigEndian::read_u32(&btree[24..28]);
    let max_nodes = btree.len() / node_size;

    let mut node_idx = first_leaf;
    let mut visited = 0usize;
    while node_idx != 0 {
        visited += 1;
        if visited > max_nodes {
            return Err(FilesystemError::Parse("B-tree leaf chain loops".into()));
        }
        let offset = node_idx as usize * node_size;
        if offset + node_size > btree.len() {
            break;
        }
        let node = &btree[offset..offset + node_size];

        let next_node = BigEndian::read_u32(&node[0..4]);
        let num_records = BigEndian::read_u16(&node[10..12]);

        for i in 0..num_records as usize {
            // Record offset is stored at end of node, growing backward
            let Some(offset_pos) = node_size.checked_sub(2 * (i + 1)) else {
                break;
            };
            let rec_offset = BigEndian::read_u16(&node[offset_pos..offset_pos + 2]) as usize;
            if rec_offset + 1 >= node.len() {
                continue;
            }
            let key_len = node[rec_offset] as usize;
            if rec_offset + 1 + key_len > node.len() {
                continue;
            }
            let key = &node[rec_offset + 1..rec_offset + 1 + key_len];

            // Record data follows key (aligned to even boundary)
            let mut data_offset = rec_offset + 1 + key_len;
            if data_offset % 2 != 0 {
                data_offset += 1;
            }
            if data_offset >= node.len() {
                continue;
            }
            visit(key, &node[data_offset..]);
        }

        node_idx = next_node;
    }
    Ok(())
}

fn parse_extents_overflow(extents_file: &[u8]) -> Result<OverflowMap, FilesystemError> {
    let mut map = OverflowMap::new();
    for_each_leaf_record(extents_file, |key, data| {
        // key: forkType(1) + fileID(4) + startBlock(2)
        if key.len() < 7 || data.len() < 12 {
            return;
        }
        let fork = key[0];
        let file_id = BigEndian::read_u32(&key[1..5]);
        let start = BigEndian::read_u16(&key[5..7]);
        map.entry((file_id, fork))
            .or_default()
            .push((start, HfsExtDescriptor::parse_record(&data[..12])));
    })?;
    for runs in map.values_mut() {
        runs.sort_by_key(|(start, _)| *start);
    }
    debug!("extents overflow: {} fork(s) with extra extents", map.len());
    Ok(map)
}

fn read_info(rec: &[u8], dates_at: usize, finder_at: usize, ext_at: usize) -> CatalogInfo {
    let mut finder_info = [0u8; 16];
    finder_info.copy_from_slice(&rec[finder_at..finder_at + 16]);
    let mut ext_finder_info = [0u8; 16];
    ext_finder_info.copy_from_slice(&rec[ext_at..ext_at + 16]);
    CatalogInfo {
        cnid: None,
        create_date: BigEndian::read_u32(&rec[dates_at..dates_at + 4]),
        modify_date: BigEndian::read_u32(&rec[dates_at + 4..dates_at + 8]),
        backup_date: BigEndian::read_u32(&rec[dates_at + 8..dates_at + 12]),
        finder_info,
        ext_finder_info,
        flags: 0,
    }
}

/// Parse all directory and file records, grouped by parent CNID.
fn parse_catalog(catalog: &[u8]) -> Result<HashMap<u32, Vec<CatalogRecord>>, FilesystemError> {
    let mut by_parent: HashMap<u32, Vec<CatalogRecord>> = HashMap::new();
    for_each_leaf_record(catalog, |key, rec| {
        // key: reserved(1) + parent_id(4) + name_len(1) + name(N)
        if key.len() < 6 || rec.len() < 2 {
            return;
        }
        let parent_id = BigEndian::read_u32(&key[1..5]);
        let name_len = key[5] as usize;
        let name = if name_len > 0 && 6 + name_len <= key.len() {
            mac_roman_to_utf8(&key[6..6 + name_len])
        } else {
            String::new()
        };

        match rec[0] as i8 {
            CATALOG_DIR if rec.len() >= 70 => {
                let mut info = read_info(rec, 10, 22, 38);
                info.flags = BigEndian::read_u16(&rec[2..4]);
                let dir_id = BigEndian::read_u32(&rec[6..10]);
                info.cnid = Some(dir_id);
                by_parent
                    .entry(parent_id)
                    .or_default()
                    .push(CatalogRecord::Directory { dir_id, name, info });
            }
            CATALOG_FILE if rec.len() >= 102 => {
                let mut info = read_info(rec, 44, 4, 56);
                info.flags = rec[2] as u16;
                // File ID (filFlNum) at offset 20
                let file_id = BigEndian::read_u32(&rec[20..24]);
                info.cnid = Some(file_id);
                // Finder Info (FInfo) at offset 4: fdType(4) + fdCreator(4)
                let mut type_code = [0u8; 4];
                type_code.copy_from_slice(&rec[4..8]);
                let mut creator = [0u8; 4];
                creator.copy_from_slice(&rec[8..12]);
                by_parent
                    .entry(parent_id)
                    .or_default()
                    .push(CatalogRecord::File {
                        file_id,
                        name,
                        type_code: FourCC(type_code),
                        creator: FourCC(creator),
                        // Data fork: logical size at offset 26, first 3 extents at 74
                        data_size: BigEndian::read_u32(&rec[26..30]),
                        data_extents: HfsExtDescriptor::parse_record(&rec[74..86]),
                        // Resource fork: logical size at offset 36, extents at 86
                        rsrc_size: BigEndian::read_u32(&rec[36..40]),
                        rsrc_extents: HfsExtDescriptor::parse_record(&rec[86..98]),
                        info,
                    });
            }
            _ => {}
        }
    })?;
    Ok(by_parent)
}

/// Reads forks out of the image once the MDB is known.
struct ForkReader<'a, R: Read + Seek> {
    reader: &'a mut R,
    mdb: &'a HfsMasterDirectoryBlock,
    overflow: OverflowMap,
}

impl<R: Read + Seek> ForkReader<'_, R> {
    fn read_fork(
        &mut self,
        file_id: u32,
        fork: u8,
        extents: &[HfsExtDescriptor; 3],
        size: u64,
    ) -> Result<Vec<u8>, FilesystemError> {
        let mut runs: Vec<HfsExtDescriptor> = extents.to_vec();
        if let Some(extra) = self.overflow.get(&(file_id, fork)) {
            for (_, record) in extra {
                runs.extend_from_slice(record);
            }
        }
        read_fork_data(self.reader, self.mdb, &runs, size)
    }
}

/// Read `size` bytes of fork data from a list of extents.
fn read_fork_data<R: Read + Seek>(
    reader: &mut R,
    mdb: &HfsMasterDirectoryBlock,
    extents: &[HfsExtDescriptor],
    size: u64,
) -> Result<Vec<u8>, FilesystemError> {
    let mut data = Vec::with_capacity(size as usize);
    let first_alloc_offset = mdb.first_alloc_block as u64 * 512;

    for ext in extents {
        if data.len() as u64 >= size {
            break;
        }
        if ext.block_count == 0 {
            break;
        }
        let offset = first_alloc_offset + ext.start_block as u64 * mdb.block_size as u64;
        let len = ext.block_count as u64 * mdb.block_size as u64;
        reader.seek(SeekFrom::Start(offset))?;
        let read_len = len.min(size - data.len() as u64) as usize;
        let mut buf = vec![0u8; read_len];
        reader.read_exact(&mut buf)?;
        data.extend_from_slice(&buf);
    }

    if (data.len() as u64) < size {
        return Err(FilesystemError::InvalidData(format!(
            "fork extents cover {} of {size} bytes",
            data.len()
        )));
    }
    Ok(data)
}

/// Load a classic HFS image into an in-memory [`Volume`].
pub fn read_volume<R: Read + Seek>(mut reader: R) -> Result<Volume, FilesystemError> {
    let mut boot_blocks = vec![0u8; MDB_OFFSET as usize];
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut boot_blocks)?;

    // Read MDB at offset + 1024 (sector 2)
    let mut mdb_buf = [0u8; MDB_SIZE];
    reader.read_exact(&mut mdb_buf)?;
    let mdb = HfsMasterDirectoryBlock::parse(&mdb_buf)?;

    if mdb.has_embedded_hfs_plus() {
        return Err(FilesystemError::Unsupported(
            "this HFS volume contains an embedded HFS+ volume".into(),
        ));
    }
    if mdb.block_size == 0 || mdb.block_size % 512 != 0 {
        return Err(FilesystemError::Parse(format!(
            "invalid allocation block size {}",
            mdb.block_size
        )));
    }
    debug!(
        "MDB ok: name={:?}, block_size={}, total_blocks={}, first_alloc_block={}",
        mdb.volume_name, mdb.block_size, mdb.total_blocks, mdb.first_alloc_block
    );

    let extents_file = read_fork_data(
        &mut reader,
        &mdb,
        &mdb.extents_file_extents,
        mdb.extents_file_size as u64,
    )?;
    let overflow = parse_extents_overflow(&extents_file)?;

    let mut forks = ForkReader {
        reader: &mut reader,
        mdb: &mdb,
        overflow,
    };
    let catalog = forks.read_fork(
        CATALOG_FILE_CNID,
        FORK_DATA,
        &mdb.catalog_file_extents,
        mdb.catalog_file_size as u64,
    )?;
    let mut by_parent = parse_catalog(&catalog)?;
    let total_records: usize = by_parent.values().map(Vec::len).sum();

    // The root directory record is the sole child of CNID 1.
    let root_info = by_parent
        .remove(&1)
        .and_then(|records| {
            records.into_iter().find_map(|r| match r {
                CatalogRecord::Directory { dir_id, info, .. } if dir_id == ROOT_CNID => {
                    Some(info)
                }
                _ => None,
            })
        })
        .ok_or_else(|| FilesystemError::Parse("catalog has no root directory record".into()))?;

    let mut visited = HashSet::new();
    let mut placed = 1usize;
    let root = build_folder(
        &mut forks,
        &mut by_parent,
        ROOT_CNID,
        root_info,
        &mut visited,
        &mut placed,
    )?;
    if placed < total_records {
        warn!(
            "{} catalog record(s) are not reachable from the root and were dropped",
            total_records - placed
        );
    }

    Ok(Volume {
        name: mdb.volume_name.clone(),
        root,
        boot_blocks,
        create_date: mdb.create_date,
        backup_date: mdb.backup_date,
        write_count: mdb.write_count,
        finder_info: mdb.finder_info,
        next_cnid: mdb.next_cnid,
    })
}

fn build_folder<R: Read + Seek>(
    forks: &mut ForkReader<'_, R>,
    by_parent: &mut HashMap<u32, Vec<CatalogRecord>>,
    dir_id: u32,
    info: CatalogInfo,
    visited: &mut HashSet<u32>,
    placed: &mut usize,
) -> Result<Folder, FilesystemError> {
    if !visited.insert(dir_id) {
        return Err(FilesystemError::Parse(format!(
            "directory {dir_id} appears twice in the catalog"
        )));
    }
    let mut folder = Folder::with_info(info);
    for record in by_parent.remove(&dir_id).unwrap_or_default() {
        *placed += 1;
        match record {
            CatalogRecord::Directory {
                dir_id: child_id,
                name,
                info,
            } => {
                let child = build_folder(forks, by_parent, child_id, info, visited, placed)?;
                folder.insert(&name, Node::Folder(child));
            }
            CatalogRecord::File {
                file_id,
                name,
                type_code,
                creator,
                data_size,
                data_extents,
                rsrc_size,
                rsrc_extents,
                info,
            } => {
                let data =
                    forks.read_fork(file_id, FORK_DATA, &data_extents, data_size as u64)?;
                let rsrc =
                    forks.read_fork(file_id, FORK_RSRC, &rsrc_extents, rsrc_size as u64)?;
                folder.insert(
                    &name,
                    Node::File(File {
                        data,
                        rsrc,
                        type_code,
                        creator,
                        info,
                    }),
                );
            }
        }
    }
    Ok(folder)
}

impl Volume {
    /// Parse a whole image held in memory.
    pub fn read(image: &[u8]) -> Result<Self, FilesystemError> {
        read_volume(Cursor::new(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::hfs_write::WriteOptions;

    fn mdb_bytes() -> [u8; MDB_SIZE] {
        let mut data = [0u8; MDB_SIZE];
        // Signature
        BigEndian::write_u16(&mut data[0..2], HFS_SIGNATURE);
        // total_blocks
        BigEndian::write_u16(&mut data[18..20], 1000);
        // block_size
        BigEndian::write_u32(&mut data[20..24], 4096);
        // next CNID
        BigEndian::write_u32(&mut data[30..34], 77);
        // volume name: Pascal string "TestVol"
        data[36] = 7;
        data[37..44].copy_from_slice(b"TestVol");
        data
    }

    #[test]
    fn test_mdb_parse() {
        let data = mdb_bytes();
        let mdb = HfsMasterDirectoryBlock::parse(&data).unwrap();
        assert_eq!(mdb.total_blocks, 1000);
        assert_eq!(mdb.block_size, 4096);
        assert_eq!(mdb.next_cnid, 77);
        assert_eq!(mdb.volume_name, "TestVol");
        assert!(!mdb.has_embedded_hfs_plus());
    }

    #[test]
    fn test_mdb_bad_signature() {
        let mut data = mdb_bytes();
        BigEndian::write_u16(&mut data[0..2], 0x1234);
        assert!(matches!(
            HfsMasterDirectoryBlock::parse(&data),
            Err(FilesystemError::Parse(_))
        ));
    }

    #[test]
    fn test_mdb_detect_embedded_hfs_plus() {
        let mut data = mdb_bytes();
        BigEndian::write_u16(&mut data[124..126], HFS_PLUS_EMBEDDED_SIGNATURE);
        let mdb = HfsMasterDirectoryBlock::parse(&data).unwrap();
        assert!(mdb.has_embedded_hfs_plus());
    }

    #[test]
    fn test_read_volume_rejects_non_hfs() {
        let image = vec![0u8; 4096];
        assert!(Volume::read(&image).is_err());
    }

    #[test]
    fn test_read_fork_data_spans_extents() {
        let mdb = HfsMasterDirectoryBlock::parse(&mdb_bytes()).unwrap();
        let mut image = vec![0u8; 4096 * 4];
        image[4096..4096 + 4].copy_from_slice(b"head");
        image[3 * 4096..3 * 4096 + 4].copy_from_slice(b"tail");
        let extents = [
            HfsExtDescriptor {
                start_block: 1,
                block_count: 1,
            },
            HfsExtDescriptor {
                start_block: 3,
                block_count: 1,
            },
        ];
        let data = read_fork_data(&mut Cursor::new(image), &mdb, &extents, 4096 + 4).unwrap();
        assert_eq!(&data[..4], b"head");
        assert_eq!(&data[4096..], b"tail");
    }

    #[test]
    fn test_read_fork_data_short_extents() {
        let mdb = HfsMasterDirectoryBlock::parse(&mdb_bytes()).unwrap();
        let image = vec![0u8; 4096 * 2];
        let extents = [HfsExtDescriptor {
            start_block: 0,
            block_count: 1,
        }];
        assert!(matches!(
            read_fork_data(&mut Cursor::new(image), &mdb, &extents, 5000),
            Err(FilesystemError::InvalidData(_))
        ));
    }

    #[test]
    fn test_fork_continues_in_extents_overflow() {
        const BLOCK: usize = 512;
        let data: Vec<u8> = (0..4 * BLOCK).map(|i| (i / BLOCK) as u8 + 1).collect();
        let mut vol = Volume::new("Frag");
        vol.root
            .insert("frag", File::new(data.clone(), FourCC::TEXT, FourCC::TEXT).into());
        let opts = WriteOptions {
            desktop_db: false,
            ..WriteOptions::new(800 * 1024, 512)
        };
        let mut image = vol.write(&opts).unwrap();

        let mdb = HfsMasterDirectoryBlock::parse(&image[1024..1024 + MDB_SIZE]).unwrap();
        assert_eq!(mdb.block_size as usize, BLOCK);
        let alloc_base = mdb.first_alloc_block as usize * 512;
        let block_at = |n: u16| alloc_base + n as usize * BLOCK;

        // File record: key is reserved, parent 2, then the Pascal name
        let catalog_at = block_at(mdb.catalog_file_extents[0].start_block);
        let catalog_len = mdb.catalog_file_size as usize;
        let pattern = [0, 0, 0, 0, 2, 4, b'f', b'r', b'a', b'g'];
        let key_at = catalog_at
            + image[catalog_at..catalog_at + catalog_len]
                .windows(pattern.len())
                .position(|w| w == pattern)
                .unwrap()
            - 1;
        let rec_at = (key_at + 1 + image[key_at] as usize).next_multiple_of(2);
        assert_eq!(image[rec_at] as i8, CATALOG_FILE);
        let file_id = BigEndian::read_u32(&image[rec_at + 20..rec_at + 24]);
        let first = BigEndian::read_u16(&image[rec_at + 74..rec_at + 76]);
        assert_eq!(BigEndian::read_u16(&image[rec_at + 76..rec_at + 78]), 4);

        // Three one-block extents in the record; the fourth block moves far away
        let moved = first + 100;
        let src = block_at(first + 3);
        image.copy_within(src..src + BLOCK, block_at(moved));
        image[src..src + BLOCK].fill(0);
        let record = [0, 1, 2].map(|i| HfsExtDescriptor {
            start_block: first + i,
            block_count: 1,
        });
        HfsExtDescriptor::write_record(&record, &mut image[rec_at + 74..rec_at + 86]);

        // Extents B-tree: header points at one leaf holding the overflow record
        let ext_at = block_at(mdb.extents_file_extents[0].start_block);
        BigEndian::write_u16(&mut image[ext_at + 14..ext_at + 16], 1); // depth
        BigEndian::write_u32(&mut image[ext_at + 16..ext_at + 20], 1); // root
        BigEndian::write_u32(&mut image[ext_at + 20..ext_at + 24], 1); // leaf records
        BigEndian::write_u32(&mut image[ext_at + 24..ext_at + 28], 1); // first leaf
        BigEndian::write_u32(&mut image[ext_at + 28..ext_at + 32], 1); // last leaf

        let leaf = ext_at + 512;
        image[leaf + 8] = 0xFF;
        image[leaf + 9] = 1;
        BigEndian::write_u16(&mut image[leaf + 10..leaf + 12], 1);
        let rec = leaf + 14;
        image[rec] = 7;
        image[rec + 1] = FORK_DATA;
        BigEndian::write_u32(&mut image[rec + 2..rec + 6], file_id);
        BigEndian::write_u16(&mut image[rec + 6..rec + 8], 3);
        let overflow = [
            HfsExtDescriptor {
                start_block: moved,
                block_count: 1,
            },
            HfsExtDescriptor::default(),
            HfsExtDescriptor::default(),
        ];
        HfsExtDescriptor::write_record(&overflow, &mut image[rec + 8..rec + 20]);
        BigEndian::write_u16(&mut image[leaf + 510..leaf + 512], 14);
        BigEndian::write_u16(&mut image[leaf + 508..leaf + 510], 34);

        let back = Volume::read(&image).unwrap();
        let frag = back.root.get("frag").and_then(Node::as_file).unwrap();
        assert_eq!(frag.data, data);
    }
}
