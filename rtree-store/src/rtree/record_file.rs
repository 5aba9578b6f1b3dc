//! Append-only record storage for the record file.
//!
//! Records live behind a 40-byte pairing header and are identified by the
//! byte offset of their live flag, which never moves: deletion only
//! overwrites the flag with a tombstone and space comes back at rebuild.
//! The payload is an opaque length-prefixed blob, so records are variable
//! length and the file is read either by exact offset or by a forward scan.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::PathBuf;

use crate::config::RTreeConfig;
use crate::mbr::Mbr;
use crate::rtree::constants::{
    CONFIG_HASH_LEN, PAIRING_PREFIX_LEN, RECORD_FLAG_SIZE, UNIQUE_SEQUENCE_LEN,
};
use crate::rtree::tree_file::{check_fits, read_pairing_prefix};
use crate::rtree::types::{RTreeError, RTreeResult, Record, RecordOffset};

/// Length of the payload length prefix written by the blob codec.
const PAYLOAD_LEN_PREFIX: usize = 8;

pub struct RecordFile {
    file: RwLock<std::fs::File>,
    #[allow(dead_code)]
    path: PathBuf,
    dimensions: u32,
    coord_size: u8,
    unique_sequence: RwLock<[u8; UNIQUE_SEQUENCE_LEN]>,
    config_hash: [u8; CONFIG_HASH_LEN],
}

impl RecordFile {
    /// Creates a fresh record file holding only the pairing header.
    pub fn create(
        config: &RTreeConfig,
        unique_sequence: [u8; UNIQUE_SEQUENCE_LEN],
        config_hash: [u8; CONFIG_HASH_LEN],
    ) -> RTreeResult<RecordFile> {
        let path = config.record_path();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        log::debug!("creating record file at {:?}", path);

        let records = RecordFile {
            file: RwLock::new(file),
            path,
            dimensions: config.dimensions,
            coord_size: config.coord_size,
            unique_sequence: RwLock::new(unique_sequence),
            config_hash,
        };
        records.write_header()?;
        records.sync()?;
        Ok(records)
    }

    /// Opens an existing record file and checks that it is the other half
    /// of the caller's tree file.
    pub fn open(
        config: &RTreeConfig,
        expected_sequence: [u8; UNIQUE_SEQUENCE_LEN],
        expected_hash: [u8; CONFIG_HASH_LEN],
    ) -> RTreeResult<RecordFile> {
        let path = config.record_path();
        let (sequence, hash) = read_pairing_prefix(&path)?;
        if sequence != expected_sequence || hash != expected_hash {
            return Err(RTreeError::IncompatibleFiles(
                "record file does not pair with the tree file".into(),
            ));
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        log::debug!("opening record file at {:?}", path);

        Ok(RecordFile {
            file: RwLock::new(file),
            path,
            dimensions: config.dimensions,
            coord_size: config.coord_size,
            unique_sequence: RwLock::new(sequence),
            config_hash: hash,
        })
    }

    /// Appends a record and returns the offset of its live flag. The offset
    /// is the record's permanent identity.
    pub fn append(&self, record: &Record) -> RTreeResult<RecordOffset> {
        if record.coordinates.len() != self.dimensions as usize {
            return Err(RTreeError::DimMismatch {
                expected: self.dimensions as usize,
                actual: record.coordinates.len(),
            });
        }

        // validate widths up front so a failure cannot leave a torn record
        for &coordinate in &record.coordinates {
            check_fits(coordinate, self.coord_size, "coordinate")?;
        }

        let mut file = self.file.write();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_u8(record.live as u8)?;
        for &coordinate in &record.coordinates {
            file.write_int::<LittleEndian>(coordinate, self.coord_size as usize)?;
        }
        bincode::serde::encode_into_std_write(
            &record.payload,
            &mut *file,
            bincode::config::legacy(),
        )
        .map_err(|err| RTreeError::Serialization(err.to_string()))?;
        file.flush()?;

        Ok(offset as RecordOffset)
    }

    /// Reads the record starting at `offset`, tombstoned or not.
    pub fn get(&self, offset: RecordOffset) -> RTreeResult<Record> {
        let mut file = self.file.write();
        let file_size = file.metadata()?.len();
        self.check_offset(offset, file_size)?;

        file.seek(SeekFrom::Start(offset as u64))?;
        Self::decode_record(&mut *file, self.dimensions, self.coord_size)
    }

    /// Overwrites a record's live flag with a tombstone. The bytes of the
    /// record stay in place until the next rebuild.
    pub fn tombstone(&self, offset: RecordOffset) -> RTreeResult<()> {
        let mut file = self.file.write();
        let file_size = file.metadata()?.len();
        self.check_offset(offset, file_size)?;

        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_u8(0)?;
        file.flush()?;
        Ok(())
    }

    /// Decodes the whole file front to back, skipping tombstoned records.
    pub fn scan_live(&self) -> RTreeResult<Vec<(RecordOffset, Record)>> {
        let mut file = self.file.write();
        let file_size = file.metadata()?.len();
        let mut position = file.seek(SeekFrom::Start(PAIRING_PREFIX_LEN as u64))?;

        let mut live = Vec::new();
        while position < file_size {
            let record = Self::decode_record(&mut *file, self.dimensions, self.coord_size)?;
            if record.live {
                live.push((position as RecordOffset, record));
            }
            position = file.stream_position()?;
        }
        Ok(live)
    }

    /// Linear baseline: first live record at exactly `coordinates`.
    pub fn linear_search_point(&self, coordinates: &[i64]) -> RTreeResult<Option<Record>> {
        Ok(self
            .scan_live()?
            .into_iter()
            .map(|(_, record)| record)
            .find(|record| record.coordinates == coordinates))
    }

    /// Linear baseline: every live record inside the closed window.
    pub fn linear_search_window(&self, low: &[i64], high: &[i64]) -> RTreeResult<Vec<Record>> {
        let window = Mbr::from_corners(low, high);
        Ok(self
            .scan_live()?
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| window.contains_point(&record.coordinates))
            .collect())
    }

    /// Linear baseline: the `k` live records closest to `coordinates`,
    /// nearest first.
    pub fn linear_search_knn(&self, k: usize, coordinates: &[i64]) -> RTreeResult<Vec<Record>> {
        let mut records: Vec<Record> = self
            .scan_live()?
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        records.sort_by(|a, b| {
            a.distance_to(coordinates)
                .partial_cmp(&b.distance_to(coordinates))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        records.truncate(k);
        Ok(records)
    }

    /// Truncates back to a header-only file under a fresh pairing nonce.
    pub fn reset(&self, unique_sequence: [u8; UNIQUE_SEQUENCE_LEN]) -> RTreeResult<()> {
        {
            let file = self.file.write();
            file.set_len(0)?;
        }
        *self.unique_sequence.write() = unique_sequence;
        self.write_header()?;
        self.sync()
    }

    pub fn sync(&self) -> RTreeResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn write_header(&self) -> RTreeResult<()> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&*self.unique_sequence.read())?;
        file.write_all(&self.config_hash)?;
        file.flush()?;
        Ok(())
    }

    /// The smallest record this layout can produce: flag, coordinates and
    /// an empty payload's length prefix.
    fn min_record_len(&self) -> u64 {
        (RECORD_FLAG_SIZE + self.dimensions as usize * self.coord_size as usize + PAYLOAD_LEN_PREFIX)
            as u64
    }

    fn check_offset(&self, offset: RecordOffset, file_size: u64) -> RTreeResult<()> {
        if offset < PAIRING_PREFIX_LEN as RecordOffset
            || offset as u64 + self.min_record_len() > file_size
        {
            return Err(RTreeError::RecordNotFound(offset));
        }
        Ok(())
    }

    fn decode_record(
        file: &mut std::fs::File,
        dimensions: u32,
        coord_size: u8,
    ) -> RTreeResult<Record> {
        let live = file.read_u8()? != 0;
        let mut coordinates = Vec::with_capacity(dimensions as usize);
        for _ in 0..dimensions {
            coordinates.push(file.read_int::<LittleEndian>(coord_size as usize)?);
        }
        let payload: Vec<u8> =
            bincode::serde::decode_from_std_read(file, bincode::config::legacy())
                .map_err(|err| RTreeError::Serialization(err.to_string()))?;
        Ok(Record {
            live,
            coordinates,
            payload,
        })
    }
}
