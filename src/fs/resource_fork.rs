//! Classic Mac OS resource fork reading and writing.
//!
//! Layout: 16-byte header, the resource data area (each entry prefixed by
//! its u32 length), then the resource map with its type list, reference
//! lists and name list.

use byteorder::{BigEndian, ByteOrder};

use super::filesystem::FilesystemError;
use super::volume::FourCC;

const HEADER_SIZE: usize = 16;
/// Data starts after the header, the system area and the application area.
const DATA_OFFSET: usize = 256;
/// Header copy, next-map handle, file ref, attributes, two list offsets.
const MAP_HEADER_SIZE: usize = 28;
const TYPE_ENTRY_SIZE: usize = 8;
const REF_ENTRY_SIZE: usize = 12;
const NO_NAME: u16 = 0xFFFF;

/// One resource with its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: FourCC,
    pub id: i16,
    /// Mac Roman name, if the resource has one.
    pub name: Option<Vec<u8>>,
    pub attributes: u8,
    pub data: Vec<u8>,
}

impl Resource {
    pub fn new(kind: FourCC, id: i16, data: Vec<u8>) -> Self {
        Resource {
            kind,
            id,
            name: None,
            attributes: 0,
            data,
        }
    }
}

/// The resources of one fork, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceFork {
    resources: Vec<Resource>,
}

fn slice<'a>(buf: &'a [u8], start: usize, len: usize, what: &str) -> Result<&'a [u8], FilesystemError> {
    start
        .checked_add(len)
        .and_then(|end| buf.get(start..end))
        .ok_or_else(|| FilesystemError::Parse(format!("resource fork: {what} out of bounds")))
}

impl ResourceFork {
    pub fn new() -> Self {
        ResourceFork::default()
    }

    /// Parse a resource fork. An empty fork has no resources.
    pub fn parse(fork: &[u8]) -> Result<Self, FilesystemError> {
        if fork.is_empty() {
            return Ok(ResourceFork::new());
        }
        let header = slice(fork, 0, HEADER_SIZE, "header")?;
        let data_offset = BigEndian::read_u32(&header[0..4]) as usize;
        let map_offset = BigEndian::read_u32(&header[4..8]) as usize;
        let data_len = BigEndian::read_u32(&header[8..12]) as usize;
        let map_len = BigEndian::read_u32(&header[12..16]) as usize;

        let data_area = slice(fork, data_offset, data_len, "data area")?;
        let map = slice(fork, map_offset, map_len, "map")?;
        if map.len() < MAP_HEADER_SIZE {
            return Err(FilesystemError::Parse("resource map too short".into()));
        }
        let type_list = BigEndian::read_u16(&map[24..26]) as usize;
        let name_list = BigEndian::read_u16(&map[26..28]) as usize;

        // Stored as count - 1; 0xFFFF means no types
        let type_count = BigEndian::read_u16(slice(map, type_list, 2, "type list")?)
            .wrapping_add(1) as usize;

        let mut resources = Vec::new();
        for t in 0..type_count {
            let entry = slice(map, type_list + 2 + t * TYPE_ENTRY_SIZE, TYPE_ENTRY_SIZE, "type entry")?;
            let kind = FourCC([entry[0], entry[1], entry[2], entry[3]]);
            let count = BigEndian::read_u16(&entry[4..6]) as usize + 1;
            let refs_at = type_list + BigEndian::read_u16(&entry[6..8]) as usize;

            for r in 0..count {
                let reference = slice(map, refs_at + r * REF_ENTRY_SIZE, REF_ENTRY_SIZE, "reference")?;
                let id = BigEndian::read_i16(&reference[0..2]);
                let name_offset = BigEndian::read_u16(&reference[2..4]);
                let attributes = reference[4];
                let offset = BigEndian::read_u24(&reference[5..8]) as usize;

                let len = BigEndian::read_u32(slice(data_area, offset, 4, "data length")?) as usize;
                let data = slice(data_area, offset + 4, len, "resource data")?.to_vec();

                let name = if name_offset == NO_NAME {
                    None
                } else {
                    let at = name_list + name_offset as usize;
                    let len = slice(map, at, 1, "name")?[0] as usize;
                    Some(slice(map, at + 1, len, "name")?.to_vec())
                };

                resources.push(Resource {
                    kind,
                    id,
                    name,
                    attributes,
                    data,
                });
            }
        }
        Ok(ResourceFork { resources })
    }

    pub fn get(&self, kind: FourCC, id: i16) -> Option<&Resource> {
        self.resources.iter().find(|r| r.kind == kind && r.id == id)
    }

    /// Resources of one type, in file order.
    pub fn of_kind(&self, kind: FourCC) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    /// Add a resource, replacing any with the same type and id.
    pub fn add(&mut self, resource: Resource) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.kind == resource.kind && r.id == resource.id)
        {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Serialize to fork bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        // Types in order of first appearance
        let mut kinds: Vec<FourCC> = Vec::new();
        for r in &self.resources {
            if !kinds.contains(&r.kind) {
                kinds.push(r.kind);
            }
        }

        let mut data = Vec::new();
        let mut names = Vec::new();
        let mut refs = Vec::new();
        let mut types = vec![0u8; 2 + kinds.len() * TYPE_ENTRY_SIZE];
        BigEndian::write_u16(&mut types[0..2], (kinds.len() as u16).wrapping_sub(1));

        let refs_start = types.len();
        for (t, kind) in kinds.iter().enumerate() {
            let group: Vec<&Resource> = self.of_kind(*kind).collect();
            let entry = &mut types[2 + t * TYPE_ENTRY_SIZE..2 + (t + 1) * TYPE_ENTRY_SIZE];
            entry[0..4].copy_from_slice(&kind.0);
            BigEndian::write_u16(&mut entry[4..6], group.len() as u16 - 1);
            BigEndian::write_u16(&mut entry[6..8], (refs_start + refs.len()) as u16);

            for r in group {
                let mut reference = [0u8; REF_ENTRY_SIZE];
                BigEndian::write_i16(&mut reference[0..2], r.id);
                let name_offset = match &r.name {
                    Some(name) => {
                        let at = names.len() as u16;
                        let len = name.len().min(255);
                        names.push(len as u8);
                        names.extend_from_slice(&name[..len]);
                        at
                    }
                    None => NO_NAME,
                };
                BigEndian::write_u16(&mut reference[2..4], name_offset);
                reference[4] = r.attributes;
                BigEndian::write_u24(&mut reference[5..8], data.len() as u32);
                refs.extend_from_slice(&reference);

                data.extend_from_slice(&(r.data.len() as u32).to_be_bytes());
                data.extend_from_slice(&r.data);
            }
        }

        let mut header = [0u8; HEADER_SIZE];
        let map_offset = DATA_OFFSET + data.len();
        let map_len = MAP_HEADER_SIZE + types.len() + refs.len() + names.len();
        BigEndian::write_u32(&mut header[0..4], DATA_OFFSET as u32);
        BigEndian::write_u32(&mut header[4..8], map_offset as u32);
        BigEndian::write_u32(&mut header[8..12], data.len() as u32);
        BigEndian::write_u32(&mut header[12..16], map_len as u32);

        let mut map = vec![0u8; MAP_HEADER_SIZE];
        map[0..HEADER_SIZE].copy_from_slice(&header);
        BigEndian::write_u16(&mut map[24..26], MAP_HEADER_SIZE as u16);
        BigEndian::write_u16(
            &mut map[26..28],
            (MAP_HEADER_SIZE + types.len() + refs.len()) as u16,
        );
        map.extend_from_slice(&types);
        map.extend_from_slice(&refs);
        map.extend_from_slice(&names);

        let mut fork = vec![0u8; DATA_OFFSET];
        fork[0..HEADER_SIZE].copy_from_slice(&header);
        fork.extend_from_slice(&data);
        fork.extend_from_slice(&map);
        fork
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_fork_has_no_resources() {
        assert!(ResourceFork::parse(&[]).unwrap().is_empty());

        let bytes = ResourceFork::new().to_bytes();
        // Type count is stored as count - 1
        let map_at = BigEndian::read_u32(&bytes[4..8]) as usize;
        assert_eq!(BigEndian::read_u16(&bytes[map_at + 28..map_at + 30]), 0xFFFF);
        assert!(ResourceFork::parse(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_written_fork_reads_back() {
        let mut fork = ResourceFork::new();
        fork.add(Resource::new(FourCC(*b"ICN#"), 128, vec![0xAA; 256]));
        fork.add(Resource {
            name: Some(b"Robot".to_vec()),
            attributes: 0x20,
            ..Resource::new(FourCC(*b"STR "), -16396, b"\x05Robot".to_vec())
        });
        fork.add(Resource::new(FourCC(*b"ICN#"), 129, vec![0x55; 256]));

        let back = ResourceFork::parse(&fork.to_bytes()).unwrap();
        assert_eq!(back.len(), 3);
        let icons: Vec<i16> = back.of_kind(FourCC(*b"ICN#")).map(|r| r.id).collect();
        assert_eq!(icons, vec![128, 129]);
        let str_res = back.get(FourCC(*b"STR "), -16396).unwrap();
        assert_eq!(str_res.name.as_deref(), Some(&b"Robot"[..]));
        assert_eq!(str_res.attributes, 0x20);
        assert_eq!(back.get(FourCC(*b"ICN#"), 129).unwrap().data, vec![0x55; 256]);
    }

    #[test]
    fn test_add_replaces_same_type_and_id() {
        let mut fork = ResourceFork::new();
        fork.add(Resource::new(FourCC(*b"FREF"), 128, vec![1]));
        fork.add(Resource::new(FourCC(*b"FREF"), 128, vec![2]));
        assert_eq!(fork.len(), 1);
        assert_eq!(fork.get(FourCC(*b"FREF"), 128).unwrap().data, vec![2]);
    }

    #[test]
    fn test_truncated_fork_is_rejected() {
        let mut fork = ResourceFork::new();
        fork.add(Resource::new(FourCC(*b"BNDL"), 128, vec![0; 32]));
        let bytes = fork.to_bytes();
        assert!(ResourceFork::parse(&bytes[..bytes.len() - 4]).is_err());
        assert!(ResourceFork::parse(&bytes[..8]).is_err());
    }
}
