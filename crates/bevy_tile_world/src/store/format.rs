//! Binary format for world save files.
//!
//! A save file is a header, a section table, and one blob per persisted
//! collection. Collections are sections: meta, attention, one section per
//! non-empty level, and one section per non-empty task pool. Empty
//! collections are never written; on read their absence means "empty".
//!
//! The format version is monotonically increasing. Version 1 files carried
//! an obsolete viewport section and predate task pools; opening one skips
//! the obsolete section and defaults the missing collections. Files newer
//! than [`VERSION`] fail to open.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use tile_world::{GameTask, PoolKind, PoolSnapshot, TaskId, TileIndex};

/// Magic bytes identifying a tile world save file ("TWLD").
pub const MAGIC: u32 = 0x5457_4C44;

/// Current format version.
pub const VERSION: u16 = 2;

/// Attention limit a fresh or migrated store starts with.
pub const DEFAULT_ATTENTION_LIMIT: u32 = 8;

/// File header (48 bytes, fixed size).
#[derive(Clone, Copy, Debug)]
pub struct Header {
  /// Magic number (0x54574C44 = "TWLD").
  pub magic: u32,
  /// Format version for migration.
  pub version: u16,
  /// Number of entries in the section table.
  pub section_count: u16,
  /// Unix timestamp of store creation.
  pub creation_time: u64,
  /// Unix timestamp of last commit.
  pub modified_time: u64,
  /// Reserved for future use.
  pub _reserved: [u8; 24],
}

impl Header {
  /// Header size in bytes.
  pub const SIZE: usize = 48;

  /// Creates a header for a store created at `creation_time`.
  pub fn new(creation_time: u64, section_count: u16) -> Self {
    Self {
      magic: MAGIC,
      version: VERSION,
      section_count,
      creation_time,
      modified_time: unix_now(),
      _reserved: [0; 24],
    }
  }

  /// Validates magic and version.
  pub fn validate(&self) -> Result<(), SaveFileError> {
    if self.magic != MAGIC {
      return Err(SaveFileError::InvalidMagic(self.magic));
    }
    if self.version > VERSION {
      return Err(SaveFileError::UnsupportedVersion(self.version));
    }
    Ok(())
  }

  /// Writes the header to a writer.
  pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
    writer.write_all(&self.magic.to_le_bytes())?;
    writer.write_all(&self.version.to_le_bytes())?;
    writer.write_all(&self.section_count.to_le_bytes())?;
    writer.write_all(&self.creation_time.to_le_bytes())?;
    writer.write_all(&self.modified_time.to_le_bytes())?;
    writer.write_all(&self._reserved)?;
    Ok(())
  }

  /// Reads a header from a reader.
  pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
    let mut buf = [0u8; Self::SIZE];
    reader.read_exact(&mut buf)?;

    Ok(Self {
      magic: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
      version: u16::from_le_bytes([buf[4], buf[5]]),
      section_count: u16::from_le_bytes([buf[6], buf[7]]),
      creation_time: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
      modified_time: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
      _reserved: buf[24..48].try_into().unwrap(),
    })
  }
}

/// Section kinds. The numeric values are part of the on-disk format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SectionKind {
  Meta = 0,
  Attention = 1,
  Level = 2,
  PoolActive = 3,
  PoolResumed = 4,
  PoolPending = 5,
  PoolPaused = 6,
  /// Persisted camera viewport; written by version 1 only.
  Viewport = 7,
}

impl SectionKind {
  fn from_u8(value: u8) -> Option<Self> {
    match value {
      0 => Some(Self::Meta),
      1 => Some(Self::Attention),
      2 => Some(Self::Level),
      3 => Some(Self::PoolActive),
      4 => Some(Self::PoolResumed),
      5 => Some(Self::PoolPending),
      6 => Some(Self::PoolPaused),
      7 => Some(Self::Viewport),
      _ => None,
    }
  }

  fn pool(self) -> Option<PoolKind> {
    match self {
      Self::PoolActive => Some(PoolKind::Active),
      Self::PoolResumed => Some(PoolKind::Resumed),
      Self::PoolPending => Some(PoolKind::Pending),
      Self::PoolPaused => Some(PoolKind::Paused),
      _ => None,
    }
  }

  fn for_pool(kind: PoolKind) -> Self {
    match kind {
      PoolKind::Active => Self::PoolActive,
      PoolKind::Resumed => Self::PoolResumed,
      PoolKind::Pending => Self::PoolPending,
      PoolKind::Paused => Self::PoolPaused,
    }
  }
}

/// Section table entry (19 bytes).
struct SectionEntry {
  kind: u8,
  /// Level index for [`SectionKind::Level`] sections, 0 otherwise.
  level: u16,
  offset: u64,
  len: u64,
}

impl SectionEntry {
  const SIZE: usize = 19;

  fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
    writer.write_all(&[self.kind])?;
    writer.write_all(&self.level.to_le_bytes())?;
    writer.write_all(&self.offset.to_le_bytes())?;
    writer.write_all(&self.len.to_le_bytes())?;
    Ok(())
  }

  fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
    let mut buf = [0u8; Self::SIZE];
    reader.read_exact(&mut buf)?;
    Ok(Self {
      kind: buf[0],
      level: u16::from_le_bytes([buf[1], buf[2]]),
      offset: u64::from_le_bytes(buf[3..11].try_into().unwrap()),
      len: u64::from_le_bytes(buf[11..19].try_into().unwrap()),
    })
  }
}

/// Save-file errors.
#[derive(Debug)]
pub enum SaveFileError {
  Io(io::Error),
  InvalidMagic(u32),
  UnsupportedVersion(u16),
  Corrupt(String),
}

impl std::fmt::Display for SaveFileError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Io(e) => write!(f, "save file I/O error: {}", e),
      Self::InvalidMagic(m) => write!(f, "invalid magic number: 0x{:08X}", m),
      Self::UnsupportedVersion(v) => {
        write!(f, "save file version {} is newer than supported {}", v, VERSION)
      }
      Self::Corrupt(what) => write!(f, "corrupt save file: {}", what),
    }
  }
}

impl std::error::Error for SaveFileError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    match self {
      Self::Io(e) => Some(e),
      _ => None,
    }
  }
}

impl From<io::Error> for SaveFileError {
  fn from(e: io::Error) -> Self {
    Self::Io(e)
  }
}

/// Everything a save file holds, decoded.
#[derive(Clone, Debug)]
pub struct StoreData {
  pub current_level: u16,
  pub attention_limit: u32,
  pub levels: HashMap<u16, HashMap<u32, TileIndex>>,
  pub pools: PoolSnapshot,
  pub creation_time: u64,
}

impl Default for StoreData {
  fn default() -> Self {
    Self {
      current_level: 0,
      attention_limit: DEFAULT_ATTENTION_LIMIT,
      levels: HashMap::new(),
      pools: PoolSnapshot::default(),
      creation_time: unix_now(),
    }
  }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

// ===== Section codecs =====

fn write_meta(data: &StoreData) -> Vec<u8> {
  data.current_level.to_le_bytes().to_vec()
}

fn read_meta(bytes: &[u8]) -> Result<u16, SaveFileError> {
  if bytes.len() < 2 {
    return Err(SaveFileError::Corrupt("meta section too short".into()));
  }
  Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn write_attention(data: &StoreData) -> Vec<u8> {
  data.attention_limit.to_le_bytes().to_vec()
}

fn read_attention(bytes: &[u8]) -> Result<u32, SaveFileError> {
  if bytes.len() < 4 {
    return Err(SaveFileError::Corrupt("attention section too short".into()));
  }
  Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn write_level(tiles: &HashMap<u32, TileIndex>) -> Vec<u8> {
  // Sorted keys keep commits byte-stable for identical content.
  let mut keys: Vec<u32> = tiles.keys().copied().collect();
  keys.sort_unstable();

  let mut out = Vec::with_capacity(4 + keys.len() * 6);
  out.extend_from_slice(&(keys.len() as u32).to_le_bytes());
  for key in keys {
    out.extend_from_slice(&key.to_le_bytes());
    out.extend_from_slice(&tiles[&key].0.to_le_bytes());
  }
  out
}

fn read_level(bytes: &[u8]) -> Result<HashMap<u32, TileIndex>, SaveFileError> {
  let mut cursor = Cursor::new(bytes);
  let count = read_u32(&mut cursor)?;
  let mut tiles = HashMap::with_capacity(count as usize);
  for _ in 0..count {
    let key = read_u32(&mut cursor)?;
    let index = read_u16(&mut cursor)?;
    tiles.insert(key, TileIndex(index));
  }
  Ok(tiles)
}

fn write_pool(tasks: &[GameTask]) -> Vec<u8> {
  let mut out = Vec::new();
  out.extend_from_slice(&(tasks.len() as u32).to_le_bytes());
  for task in tasks {
    write_task(&mut out, task);
  }
  out
}

fn read_pool(bytes: &[u8]) -> Result<Vec<GameTask>, SaveFileError> {
  let mut cursor = Cursor::new(bytes);
  let count = read_u32(&mut cursor)?;
  let mut tasks = Vec::with_capacity(count as usize);
  for _ in 0..count {
    tasks.push(read_task(&mut cursor)?);
  }
  Ok(tasks)
}

fn write_task(out: &mut Vec<u8>, task: &GameTask) {
  out.extend_from_slice(&task.id.0.to_le_bytes());
  out.extend_from_slice(&task.cost.to_le_bytes());
  out.extend_from_slice(&task.duration_ms.to_le_bytes());
  out.extend_from_slice(&task.elapsed_ms.to_le_bytes());

  let kind = task.kind.as_bytes();
  out.extend_from_slice(&(kind.len() as u16).to_le_bytes());
  out.extend_from_slice(kind);

  let payload = serde_json::to_vec(&task.payload).unwrap_or_else(|_| b"null".to_vec());
  out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
  out.extend_from_slice(&payload);
}

fn read_task(cursor: &mut Cursor<&[u8]>) -> Result<GameTask, SaveFileError> {
  let id = TaskId(read_u64(cursor)?);
  let cost = read_u32(cursor)?;
  let duration_ms = read_u64(cursor)?;
  let elapsed_ms = read_u64(cursor)?;

  let kind_len = read_u16(cursor)? as usize;
  let mut kind = vec![0u8; kind_len];
  cursor.read_exact(&mut kind)?;
  let kind = String::from_utf8(kind)
    .map_err(|_| SaveFileError::Corrupt("task kind is not valid UTF-8".into()))?;

  let payload_len = read_u32(cursor)? as usize;
  let mut payload = vec![0u8; payload_len];
  cursor.read_exact(&mut payload)?;
  let payload = serde_json::from_slice(&payload)
    .map_err(|e| SaveFileError::Corrupt(format!("task payload: {}", e)))?;

  Ok(GameTask {
    id,
    kind,
    cost,
    duration_ms,
    elapsed_ms,
    payload,
  })
}

fn read_u16(cursor: &mut Cursor<&[u8]>) -> Result<u16, SaveFileError> {
  let mut buf = [0u8; 2];
  cursor.read_exact(&mut buf)?;
  Ok(u16::from_le_bytes(buf))
}

fn read_u32(cursor: &mut Cursor<&[u8]>) -> Result<u32, SaveFileError> {
  let mut buf = [0u8; 4];
  cursor.read_exact(&mut buf)?;
  Ok(u32::from_le_bytes(buf))
}

fn read_u64(cursor: &mut Cursor<&[u8]>) -> Result<u64, SaveFileError> {
  let mut buf = [0u8; 8];
  cursor.read_exact(&mut buf)?;
  Ok(u64::from_le_bytes(buf))
}

// ===== Whole-file read/write =====

/// Reads and migrates a save file. Returns the data and the on-disk format
/// version it was decoded from.
pub fn read_store(path: &Path) -> Result<(StoreData, u16), SaveFileError> {
  let bytes = fs::read(path)?;
  decode_store(&bytes)
}

/// Decodes a save file image. Returns the data and the image's format
/// version.
pub fn decode_store(bytes: &[u8]) -> Result<(StoreData, u16), SaveFileError> {
  let mut cursor = Cursor::new(bytes);
  let header = Header::read_from(&mut cursor)?;
  header.validate()?;

  let mut entries = Vec::with_capacity(header.section_count as usize);
  for _ in 0..header.section_count {
    entries.push(SectionEntry::read_from(&mut cursor)?);
  }

  let mut data = StoreData {
    creation_time: header.creation_time,
    ..StoreData::default()
  };

  for entry in entries {
    let Some(kind) = SectionKind::from_u8(entry.kind) else {
      return Err(SaveFileError::Corrupt(format!(
        "unknown section kind {}",
        entry.kind
      )));
    };

    let start = entry.offset as usize;
    let end = start
      .checked_add(entry.len as usize)
      .filter(|&e| e <= bytes.len())
      .ok_or_else(|| SaveFileError::Corrupt("section extends past end of file".into()))?;
    let blob = &bytes[start..end];

    match kind {
      SectionKind::Meta => data.current_level = read_meta(blob)?,
      SectionKind::Attention => data.attention_limit = read_attention(blob)?,
      SectionKind::Level => {
        let tiles = read_level(blob)?;
        if !tiles.is_empty() {
          data.levels.insert(entry.level, tiles);
        }
      }
      SectionKind::PoolActive | SectionKind::PoolResumed | SectionKind::PoolPending
      | SectionKind::PoolPaused => {
        let pool = kind.pool().expect("section kind is a pool");
        *data.pools.pool_mut(pool) = read_pool(blob)?;
      }
      SectionKind::Viewport => {
        // Obsolete since version 2: the viewport is derived state.
        if header.version >= 2 {
          return Err(SaveFileError::Corrupt(
            "viewport section in a version >= 2 file".into(),
          ));
        }
      }
    }
  }

  Ok((data, header.version))
}

/// Encodes a store image.
pub fn encode_store(data: &StoreData) -> Vec<u8> {
  // Collect (kind, level, blob) for every non-empty collection. Meta and
  // attention are always present.
  let mut sections: Vec<(SectionKind, u16, Vec<u8>)> = vec![
    (SectionKind::Meta, 0, write_meta(data)),
    (SectionKind::Attention, 0, write_attention(data)),
  ];

  let mut level_indices: Vec<u16> = data.levels.keys().copied().collect();
  level_indices.sort_unstable();
  for level in level_indices {
    let tiles = &data.levels[&level];
    if !tiles.is_empty() {
      sections.push((SectionKind::Level, level, write_level(tiles)));
    }
  }

  for pool in PoolKind::ALL {
    let tasks = data.pools.pool(pool);
    if !tasks.is_empty() {
      sections.push((SectionKind::for_pool(pool), 0, write_pool(tasks)));
    }
  }

  let table_end = Header::SIZE + sections.len() * SectionEntry::SIZE;
  let mut out = Vec::with_capacity(table_end);

  let header = Header::new(data.creation_time, sections.len() as u16);
  header.write_to(&mut out).expect("vec write is infallible");

  let mut offset = table_end as u64;
  for (kind, level, blob) in &sections {
    let entry = SectionEntry {
      kind: *kind as u8,
      level: *level,
      offset,
      len: blob.len() as u64,
    };
    entry.write_to(&mut out).expect("vec write is infallible");
    offset += blob.len() as u64;
  }

  for (_, _, blob) in &sections {
    out.extend_from_slice(blob);
  }
  out
}

/// Writes a save file atomically: temp file in the same directory, sync,
/// rename over the target.
pub fn write_store(path: &Path, data: &StoreData) -> Result<(), SaveFileError> {
  let bytes = encode_store(data);

  let tmp_path = path.with_extension("tiles.tmp");
  {
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
  }
  fs::rename(&tmp_path, path)?;
  Ok(())
}
