//! Paged node storage for the tree file.
//!
//! Maps node ids to fixed-size byte slots in a single file and reads or
//! writes exactly one node per call — there is no bulk loading. The file
//! starts with a self-describing header; every slot after it is one node
//! page of `page_size` bytes. All integers are little-endian; node ids,
//! record offsets and coordinates are signed with configurable widths.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::RTreeConfig;
use crate::mbr::{Mbr, MbrDim};
use crate::rtree::constants::{
    CONFIG_HASH_LEN, NULL_NODE_ID, PAIRING_PREFIX_LEN, UNIQUE_SEQUENCE_LEN,
};
use crate::rtree::node::RTreeNode;
use crate::rtree::types::{NodeId, RTreeError, RTreeResult};

/// Mutable header fields, captured back into the file on close.
struct TreeState {
    highest_id: NodeId,
    root_id: NodeId,
    tree_depth: u32,
}

/// Random-access node storage over one tree file.
pub struct TreeFile {
    file: RwLock<File>,
    #[allow(dead_code)]
    path: PathBuf,
    dimensions: u32,
    page_size: u32,
    id_size: u8,
    coord_size: u8,
    unique_sequence: RwLock<[u8; UNIQUE_SEQUENCE_LEN]>,
    config_hash: [u8; CONFIG_HASH_LEN],
    max_children: usize,
    header_len: u64,
    state: RwLock<TreeState>,
    nodes_read: AtomicU64,
    nodes_written: AtomicU64,
}

impl TreeFile {
    /// Creates a fresh tree file: truncates, writes the header, syncs.
    /// The root node itself is the engine's to create.
    pub fn create(
        config: &RTreeConfig,
        unique_sequence: [u8; UNIQUE_SEQUENCE_LEN],
        config_hash: [u8; CONFIG_HASH_LEN],
    ) -> RTreeResult<TreeFile> {
        let path = config.tree_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        log::debug!("creating tree file at {:?}", path);

        let tree = TreeFile {
            file: RwLock::new(file),
            path,
            dimensions: config.dimensions,
            page_size: config.page_size,
            id_size: config.id_size,
            coord_size: config.coord_size,
            unique_sequence: RwLock::new(unique_sequence),
            config_hash,
            max_children: config.max_children(),
            header_len: header_len(config.id_size),
            state: RwLock::new(TreeState {
                highest_id: NULL_NODE_ID,
                root_id: 0,
                tree_depth: 0,
            }),
            nodes_read: AtomicU64::new(0),
            nodes_written: AtomicU64::new(0),
        };
        tree.write_header()?;
        tree.sync()?;
        Ok(tree)
    }

    /// Opens an existing tree file and validates its header against the
    /// caller's expected layout parameters.
    pub fn open(config: &RTreeConfig) -> RTreeResult<TreeFile> {
        let path = config.tree_path();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        log::debug!("opening tree file at {:?}", path);

        let mut sequence = [0u8; UNIQUE_SEQUENCE_LEN];
        file.seek(SeekFrom::Start(0))?;
        read_exact_or_corrupt(&mut file, &mut sequence, "unique sequence")?;
        let mut hash = [0u8; CONFIG_HASH_LEN];
        read_exact_or_corrupt(&mut file, &mut hash, "config hash")?;

        if hash != config.config_hash() {
            return Err(RTreeError::IncompatibleFiles(
                "tree file was written with different layout parameters".into(),
            ));
        }

        let id_size = file.read_i8()? as u8;
        if id_size != config.id_size {
            return Err(RTreeError::IncompatibleFiles(format!(
                "tree file uses {}-byte ids, expected {}",
                id_size, config.id_size
            )));
        }
        let dimensions = file.read_u32::<LittleEndian>()?;
        if dimensions != config.dimensions {
            return Err(RTreeError::IncompatibleFiles(format!(
                "tree file indexes {} dimensions, expected {}",
                dimensions, config.dimensions
            )));
        }
        let page_size = file.read_u32::<LittleEndian>()?;
        if page_size != config.page_size {
            return Err(RTreeError::IncompatibleFiles(format!(
                "tree file uses {}-byte pages, expected {}",
                page_size, config.page_size
            )));
        }
        let highest_id = file.read_int::<LittleEndian>(id_size as usize)?;
        let null_id = file.read_int::<LittleEndian>(id_size as usize)?;
        if null_id != NULL_NODE_ID {
            return Err(RTreeError::CorruptTree(format!(
                "unexpected null id sentinel {null_id}"
            )));
        }
        let root_id = file.read_int::<LittleEndian>(id_size as usize)?;
        let coord_size = file.read_i8()? as u8;
        if coord_size != config.coord_size {
            return Err(RTreeError::IncompatibleFiles(format!(
                "tree file uses {}-byte coordinates, expected {}",
                coord_size, config.coord_size
            )));
        }
        let tree_depth = file.read_u32::<LittleEndian>()?;

        let header_len = header_len(id_size);
        let file_size = file.metadata()?.len();
        let stored_pages = (file_size.saturating_sub(header_len)) / page_size as u64;
        if stored_pages as i64 - 1 != highest_id {
            return Err(RTreeError::CorruptTree(format!(
                "header says highest id {} but the file holds {} pages",
                highest_id, stored_pages
            )));
        }

        Ok(TreeFile {
            file: RwLock::new(file),
            path,
            dimensions,
            page_size,
            id_size,
            coord_size,
            unique_sequence: RwLock::new(sequence),
            config_hash: hash,
            max_children: config.max_children(),
            header_len,
            state: RwLock::new(TreeState {
                highest_id,
                root_id,
                tree_depth,
            }),
            nodes_read: AtomicU64::new(0),
            nodes_written: AtomicU64::new(0),
        })
    }

    /// Reads one node page. Ids past the allocation watermark are
    /// `NodeNotFound`; a short read is corruption.
    pub fn get(&self, node_id: NodeId) -> RTreeResult<RTreeNode> {
        if node_id < 0 || node_id > self.state.read().highest_id {
            return Err(RTreeError::NodeNotFound(node_id));
        }

        let mut buffer = vec![0u8; self.page_size as usize];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(self.page_offset(node_id)))?;
            read_exact_or_corrupt(&mut file, &mut buffer, "node page")?;
        }
        self.nodes_read.fetch_add(1, Ordering::Relaxed);
        self.decode_node(node_id, &buffer)
    }

    /// Allocates the next id and writes `node` into the new slot at the end
    /// of the file. Returns the assigned id.
    pub fn create_node(&self, node: &RTreeNode) -> RTreeResult<NodeId> {
        let mut state = self.state.write();
        let node_id = state.highest_id + 1;
        let page = self.encode_node(node)?;

        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(self.page_offset(node_id)))?;
            file.write_all(&page)?;
            file.flush()?;
        }
        state.highest_id = node_id;
        self.nodes_written.fetch_add(1, Ordering::Relaxed);
        Ok(node_id)
    }

    /// Overwrites the page of an already-allocated node.
    pub fn update(&self, node_id: NodeId, node: &RTreeNode) -> RTreeResult<()> {
        if node_id < 0 || node_id > self.state.read().highest_id {
            return Err(RTreeError::NodeNotFound(node_id));
        }
        let page = self.encode_node(node)?;

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(self.page_offset(node_id)))?;
        file.write_all(&page)?;
        file.flush()?;
        self.nodes_written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn root_id(&self) -> NodeId {
        self.state.read().root_id
    }

    /// Moves the root pointer and persists the header immediately.
    pub fn set_root_id(&self, root_id: NodeId) -> RTreeResult<()> {
        self.state.write().root_id = root_id;
        self.write_header()
    }

    pub fn tree_depth(&self) -> u32 {
        self.state.read().tree_depth
    }

    pub fn set_tree_depth(&self, tree_depth: u32) -> RTreeResult<()> {
        self.state.write().tree_depth = tree_depth;
        self.write_header()
    }

    pub fn highest_id(&self) -> NodeId {
        self.state.read().highest_id
    }

    pub fn max_children(&self) -> usize {
        self.max_children
    }

    pub fn unique_sequence(&self) -> [u8; UNIQUE_SEQUENCE_LEN] {
        *self.unique_sequence.read()
    }

    pub fn config_hash(&self) -> [u8; CONFIG_HASH_LEN] {
        self.config_hash
    }

    pub fn nodes_read(&self) -> u64 {
        self.nodes_read.load(Ordering::Relaxed)
    }

    pub fn nodes_written(&self) -> u64 {
        self.nodes_written.load(Ordering::Relaxed)
    }

    /// Truncates the file back to an empty tree under a fresh pairing
    /// nonce. Used by rebuild.
    pub fn reset(&self, unique_sequence: [u8; UNIQUE_SEQUENCE_LEN]) -> RTreeResult<()> {
        {
            let file = self.file.write();
            file.set_len(0)?;
        }
        *self.unique_sequence.write() = unique_sequence;
        {
            let mut state = self.state.write();
            state.highest_id = NULL_NODE_ID;
            state.root_id = 0;
            state.tree_depth = 0;
        }
        self.write_header()?;
        self.sync()
    }

    /// Rewrites the header, capturing the current watermark, root and depth.
    pub fn write_header(&self) -> RTreeResult<()> {
        let state = self.state.read();
        let mut buffer = Vec::with_capacity(self.header_len as usize);
        buffer.extend_from_slice(&*self.unique_sequence.read());
        buffer.extend_from_slice(&self.config_hash);
        buffer.write_i8(self.id_size as i8)?;
        buffer.write_u32::<LittleEndian>(self.dimensions)?;
        buffer.write_u32::<LittleEndian>(self.page_size)?;
        self.write_id(&mut buffer, state.highest_id, "highest id")?;
        self.write_id(&mut buffer, NULL_NODE_ID, "null id")?;
        self.write_id(&mut buffer, state.root_id, "root id")?;
        buffer.write_i8(self.coord_size as i8)?;
        buffer.write_u32::<LittleEndian>(state.tree_depth)?;

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buffer)?;
        file.flush()?;
        Ok(())
    }

    pub fn sync(&self) -> RTreeResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    /// Flushes everything and captures the final header.
    pub fn close(&self) -> RTreeResult<()> {
        self.write_header()?;
        self.sync()
    }

    fn page_offset(&self, node_id: NodeId) -> u64 {
        self.header_len + node_id as u64 * self.page_size as u64
    }

    fn write_id(&self, buffer: &mut Vec<u8>, value: i64, what: &str) -> RTreeResult<()> {
        check_fits(value, self.id_size, what)?;
        buffer.write_int::<LittleEndian>(value, self.id_size as usize)?;
        Ok(())
    }

    fn encode_node(&self, node: &RTreeNode) -> RTreeResult<Vec<u8>> {
        if node.children.len() > self.max_children {
            return Err(RTreeError::CapacityExceeded(format!(
                "refusing to persist a node with {} children (maximum {})",
                node.children.len(),
                self.max_children
            )));
        }
        if node.mbr.dimension_count() != self.dimensions as usize {
            return Err(RTreeError::DimMismatch {
                expected: self.dimensions as usize,
                actual: node.mbr.dimension_count(),
            });
        }

        let mut buffer = vec![0u8; self.page_size as usize];
        let mut cursor = Cursor::new(&mut buffer[..]);
        cursor.write_u8(node.is_leaf as u8)?;
        check_fits(node.parent_id, self.id_size, "parent id")?;
        cursor.write_int::<LittleEndian>(node.parent_id, self.id_size as usize)?;
        for dim in node.mbr.dims() {
            check_fits(dim.low, self.coord_size, "coordinate")?;
            check_fits(dim.high, self.coord_size, "coordinate")?;
            cursor.write_int::<LittleEndian>(dim.low, self.coord_size as usize)?;
            cursor.write_int::<LittleEndian>(dim.high, self.coord_size as usize)?;
        }
        for &child in &node.children {
            check_fits(child, self.id_size, "child reference")?;
            cursor.write_int::<LittleEndian>(child, self.id_size as usize)?;
        }
        for _ in node.children.len()..self.max_children {
            cursor.write_int::<LittleEndian>(NULL_NODE_ID, self.id_size as usize)?;
        }
        // the remainder of the page stays zero
        Ok(buffer)
    }

    fn decode_node(&self, node_id: NodeId, buffer: &[u8]) -> RTreeResult<RTreeNode> {
        let mut cursor = Cursor::new(buffer);
        let is_leaf = cursor.read_u8()? != 0;
        let parent_id = cursor.read_int::<LittleEndian>(self.id_size as usize)?;

        let mut dims = Vec::with_capacity(self.dimensions as usize);
        for _ in 0..self.dimensions {
            let low = cursor.read_int::<LittleEndian>(self.coord_size as usize)?;
            let high = cursor.read_int::<LittleEndian>(self.coord_size as usize)?;
            dims.push(MbrDim::new(low, high));
        }

        let mut children = Vec::new();
        for _ in 0..self.max_children {
            let child = cursor.read_int::<LittleEndian>(self.id_size as usize)?;
            if child != NULL_NODE_ID {
                children.push(child);
            }
        }

        RTreeNode::new(
            Mbr::new(dims),
            Some(node_id),
            parent_id,
            children,
            is_leaf,
            self.max_children,
        )
    }
}

/// Header size in bytes: pairing prefix, three id-width fields and the
/// fixed-width layout fields around them.
fn header_len(id_size: u8) -> u64 {
    (PAIRING_PREFIX_LEN + 1 + 4 + 4 + 3 * id_size as usize + 1 + 4) as u64
}

/// Reads the 40-byte pairing prefix shared by both file formats.
pub(crate) fn read_pairing_prefix(
    path: &Path,
) -> RTreeResult<([u8; UNIQUE_SEQUENCE_LEN], [u8; CONFIG_HASH_LEN])> {
    let mut file = File::open(path)?;
    let mut sequence = [0u8; UNIQUE_SEQUENCE_LEN];
    read_exact_or_corrupt(&mut file, &mut sequence, "unique sequence")?;
    let mut hash = [0u8; CONFIG_HASH_LEN];
    read_exact_or_corrupt(&mut file, &mut hash, "config hash")?;
    Ok((sequence, hash))
}

fn read_exact_or_corrupt(file: &mut File, buffer: &mut [u8], what: &str) -> RTreeResult<()> {
    file.read_exact(buffer).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            RTreeError::CorruptTree(format!("short read while loading {what}"))
        } else {
            RTreeError::Io(err)
        }
    })
}

pub(crate) fn check_fits(value: i64, width: u8, what: &str) -> RTreeResult<()> {
    if width >= 8 {
        return Ok(());
    }
    let bits = width as u32 * 8;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << (bits - 1)) - 1;
    if value < min || value > max {
        return Err(RTreeError::Serialization(format!(
            "{what} {value} does not fit in {width} bytes"
        )));
    }
    Ok(())
}
