//! Output Chunker — the training-data file writer, external-facing
//! surface of the Training Recorder.
//!
//! Discovers prior run artifacts at startup via `glob` before appending
//! new ones, so chunk-index numbering survives a restart, and
//! gzip-compresses bulky training data with `flate2`.

use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use glob::glob;

use crate::planes::InputPlanes;

/// Both serialization shapes named in  ("Training chunk format").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFormat {
    /// Human-readable: hex-encoded planes, one field per line.
    Text,
    /// Fixed-width binary: native-endian policy floats, little-endian
    /// bitplanes, one byte per boolean/scalar feature.
    V2Binary,
}

/// Rotates training samples across chunk files, counting prior chunks at
/// startup so chunk numbering survives a restart.
pub struct Chunker {
    dir: PathBuf,
    format: ChunkFormat,
    gzip: bool,
    records_per_chunk: usize,
    next_chunk_index: u64,
    current: Option<BufWriter<Box<dyn Write + Send>>>,
    records_in_current: usize,
}

impl Chunker {
    pub fn new(
        dir: impl Into<PathBuf>,
        format: ChunkFormat,
        gzip: bool,
        records_per_chunk: usize,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let ext = match format {
            ChunkFormat::Text => "txt",
            ChunkFormat::V2Binary => "bin",
        };
        let pattern = dir.join(format!("chunk-*.{ext}*"));
        let existing = glob(&pattern.to_string_lossy())
            .map(|paths| paths.filter_map(Result::ok).count())
            .unwrap_or(0);
        Ok(Chunker {
            dir,
            format,
            gzip,
            records_per_chunk: records_per_chunk.max(1),
            next_chunk_index: existing as u64,
            current: None,
            records_in_current: 0,
        })
    }

    fn open_next_chunk(&mut self) -> io::Result<()> {
        let ext = match self.format {
            ChunkFormat::Text => "txt",
            ChunkFormat::V2Binary => "bin",
        };
        let mut filename = format!(
            "chunk-{:08}-{}.{}",
            self.next_chunk_index,
            Utc::now().format("%Y%m%dT%H%M%S"),
            ext
        );
        if self.gzip {
            filename.push_str(".gz");
        }
        let path = self.dir.join(filename);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let writer: Box<dyn Write + Send> = if self.gzip {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };
        self.current = Some(BufWriter::new(writer));
        self.next_chunk_index += 1;
        self.records_in_current = 0;
        Ok(())
    }

    /// Writes one training sample, rotating to a new chunk file first if
    /// none is open yet or the current one has filled up.
    pub fn write_record(
        &mut self,
        planes: &InputPlanes,
        policy: &[f32],
        result: f32,
    ) -> io::Result<()> {
        if self.current.is_none() || self.records_in_current >= self.records_per_chunk {
            self.open_next_chunk()?;
        }
        let writer = self.current.as_mut().expect("just opened");
        match self.format {
            ChunkFormat::Text => write_text_record(writer, planes, policy, result)?,
            ChunkFormat::V2Binary => write_v2_binary_record(writer, planes, policy, result)?,
        }
        self.records_in_current += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = self.current.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

fn write_text_record(
    w: &mut impl Write,
    planes: &InputPlanes,
    policy: &[f32],
    result: f32,
) -> io::Result<()> {
    for &plane in &planes.history {
        writeln!(w, "{plane:016x}")?;
    }
    writeln!(w, "{plane:016x}", plane = planes.rule50)?;
    writeln!(w, "{plane:016x}", plane = planes.move_count)?;
    let bool_bits: String = planes
        .castling
        .iter()
        .chain(std::iter::once(&planes.side_to_move))
        .map(|&p| if p != 0 { '1' } else { '0' })
        .collect();
    writeln!(w, "{bool_bits}")?;
    writeln!(w, "{}", (planes.rule50 & 0xFF) as u8)?;
    writeln!(w, "{}", (planes.move_count & 0xFF) as u8)?;
    let policy_str = policy
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    writeln!(w, "{policy_str}")?;
    writeln!(w, "{}", result as i32)?;
    Ok(())
}

fn write_v2_binary_record(
    w: &mut impl Write,
    planes: &InputPlanes,
    policy: &[f32],
    result: f32,
) -> io::Result<()> {
    w.write_all(&2u32.to_le_bytes())?;
    for &p in policy {
        w.write_all(&p.to_ne_bytes())?;
    }
    for &plane in &planes.history {
        w.write_all(&plane.to_le_bytes())?;
    }
    for &plane in planes
        .castling
        .iter()
        .chain(std::iter::once(&planes.side_to_move))
    {
        w.write_all(&[if plane != 0 { 1u8 } else { 0u8 }])?;
    }
    w.write_all(&[(planes.rule50 & 0xFF) as u8])?;
    w.write_all(&[(planes.move_count & 0xFF) as u8])?;
    w.write_all(&[result as i8 as u8])?;
    Ok(())
}
