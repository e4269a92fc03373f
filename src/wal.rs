use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only write-ahead log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated last entry (crash) is safely discarded via the
///   length-prefix + CRC check on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Append a single event, flush and fsync. The event is durable when
    /// this returns Ok.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    /// Return the WAL file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replay the WAL from disk, returning all valid events.
    /// Truncated/corrupt trailing entries are discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            // Read length prefix
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            // Read payload
            let mut payload = vec![0u8; len];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }

            // Read CRC
            let mut crc_buf = [0u8; 4];
            match reader.read_exact(&mut crc_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
                Err(e) => return Err(e),
            }
            let stored_crc = u32::from_le_bytes(crc_buf);
            let computed_crc = crc32fast::hash(&payload);

            if stored_crc != computed_crc {
                tracing::warn!("wal: corrupt entry at record {}, discarding tail", events.len());
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => {
                    tracing::warn!("wal: undecodable entry at record {}, discarding tail", events.len());
                    break;
                }
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use ulid::Ulid;

    use crate::model::Span;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("custos_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn sample_events() -> Vec<Event> {
        vec![
            Event::RoomCreated {
                id: Ulid::new(),
                name: "B204".into(),
                capacity: 60,
            },
            Event::BookingRequested {
                id: Ulid::new(),
                room_id: Ulid::new(),
                requester: Ulid::new(),
                span: Span::new(1000, 2000),
                purpose: None,
                at: 500,
            },
        ]
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = sample_events();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("never_created.wal");
        let replayed = Wal::replay(&path).unwrap();
        assert!(replayed.is_empty());
    }

    #[test]
    fn replay_discards_truncated_tail() {
        let path = tmp_path("truncated.wal");
        let events = sample_events();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        // Chop a few bytes off the end — simulates a crash mid-append
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, &events[..1]);
    }

    #[test]
    fn replay_stops_at_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let events = sample_events();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        // Flip a payload byte in the second record. First record is
        // 4 (len) + payload + 4 (crc); compute its size to find the offset.
        let first_len = bincode::serialize(&events[0]).unwrap().len();
        let offset = 4 + first_len + 4 + 4 + 2; // into the second payload
        let mut bytes = fs::read(&path).unwrap();
        bytes[offset] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, &events[..1]);
    }

    #[test]
    fn append_after_reopen_extends_log() {
        let path = tmp_path("reopen.wal");
        let events = sample_events();

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&events[0]).unwrap();
        }
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&events[1]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);
    }
}
