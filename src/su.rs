use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
#[cfg(target_family = "unix")]
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crate::utils::DynError;

const TRACE_HEADER_SIZE: usize = 240;

// SEG-Y trace header byte offsets (0-based) used by this tool.
const CDP_OFFSET: usize = 20;
const OFFSET_OFFSET: usize = 36;
const SCALCO_OFFSET: usize = 70;
const SX_OFFSET: usize = 72;
const SY_OFFSET: usize = 76;
const GX_OFFSET: usize = 80;
const GY_OFFSET: usize = 84;
const NS_OFFSET: usize = 114;
const DT_OFFSET: usize = 116;

fn read_i32_le(buf: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    i32::from_le_bytes(raw)
}

fn read_i16_le(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn read_u16_le(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

fn write_i32_le(buf: &mut [u8], offset: usize, value: i32) {
    if offset + 4 <= buf.len() {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
fn write_i16_le(buf: &mut [u8], offset: usize, value: i16) {
    if offset + 2 <= buf.len() {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }
}

fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    if offset + 2 <= buf.len() {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }
}

/// One Seismic Unix trace: the raw 240-byte header plus its samples.
/// Header bytes this tool does not interpret are carried through unchanged.
#[derive(Clone, Debug, PartialEq)]
pub struct SuTrace {
    header: [u8; TRACE_HEADER_SIZE],
    pub data: Vec<f32>,
}

impl SuTrace {
    pub fn cdp(&self) -> i32 {
        read_i32_le(&self.header, CDP_OFFSET)
    }
    pub fn scalco(&self) -> i16 {
        read_i16_le(&self.header, SCALCO_OFFSET)
    }
    pub fn sx(&self) -> i32 {
        read_i32_le(&self.header, SX_OFFSET)
    }
    pub fn sy(&self) -> i32 {
        read_i32_le(&self.header, SY_OFFSET)
    }
    pub fn gx(&self) -> i32 {
        read_i32_le(&self.header, GX_OFFSET)
    }
    pub fn gy(&self) -> i32 {
        read_i32_le(&self.header, GY_OFFSET)
    }
    pub fn ns(&self) -> u16 {
        read_u16_le(&self.header, NS_OFFSET)
    }
    /// Sample interval in microseconds.
    pub fn dt(&self) -> u16 {
        read_u16_le(&self.header, DT_OFFSET)
    }

    pub fn set_offset(&mut self, value: i32) {
        write_i32_le(&mut self.header, OFFSET_OFFSET, value);
    }
    pub fn set_source(&mut self, x: i32, y: i32) {
        write_i32_le(&mut self.header, SX_OFFSET, x);
        write_i32_le(&mut self.header, SY_OFFSET, y);
    }
    pub fn set_receiver(&mut self, x: i32, y: i32) {
        write_i32_le(&mut self.header, GX_OFFSET, x);
        write_i32_le(&mut self.header, GY_OFFSET, y);
    }

    /// Replace the samples, keeping the header's `ns` in sync.
    pub fn set_data(&mut self, data: Vec<f32>) -> Result<(), DynError> {
        let ns = u16::try_from(data.len()).map_err(|_| "trace longer than 65535 samples")?;
        write_u16_le(&mut self.header, NS_OFFSET, ns);
        self.data = data;
        Ok(())
    }

    /// Read one trace; `Ok(None)` on a clean end of stream.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>, DynError> {
        let mut header = [0u8; TRACE_HEADER_SIZE];
        let got = read_partial(reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < TRACE_HEADER_SIZE {
            return Err(format!("Truncated SU trace header ({got} of {TRACE_HEADER_SIZE} bytes)").into());
        }
        let ns = read_u16_le(&header, NS_OFFSET) as usize;
        let mut raw = vec![0u8; ns * 4];
        if read_partial(reader, &mut raw)? < raw.len() {
            return Err(format!("Truncated SU trace data (expected {ns} samples)").into());
        }
        let data = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Some(Self { header, data }))
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), DynError> {
        if self.data.len() != self.ns() as usize {
            return Err(format!(
                "SU trace ns mismatch: header says {}, data has {}",
                self.ns(),
                self.data.len()
            )
            .into());
        }
        writer.write_all(&self.header)?;
        for sample in &self.data {
            writer.write_all(&sample.to_le_bytes())?;
        }
        Ok(())
    }
}

/// Builders for synthetic traces.
#[cfg(test)]
impl SuTrace {
    pub fn new(ns: u16, dt_us: u16) -> Self {
        let mut header = [0u8; TRACE_HEADER_SIZE];
        write_u16_le(&mut header, NS_OFFSET, ns);
        write_u16_le(&mut header, DT_OFFSET, dt_us);
        Self { header, data: vec![0.0; ns as usize] }
    }

    pub fn offset(&self) -> i32 {
        read_i32_le(&self.header, OFFSET_OFFSET)
    }

    pub fn set_cdp(&mut self, value: i32) {
        write_i32_le(&mut self.header, CDP_OFFSET, value);
    }

    pub fn set_scalco(&mut self, value: i16) {
        write_i16_le(&mut self.header, SCALCO_OFFSET, value);
    }
}

fn read_partial<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<usize, DynError> {
    let mut total_read = 0usize;
    while total_read < buffer.len() {
        match reader.read(&mut buffer[total_read..]) {
            Ok(0) => break,
            Ok(n) => total_read += n,
            Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total_read)
}

#[cfg(target_family = "unix")]
fn advise_file_sequential(file: &File) {
    let fd = file.as_raw_fd();
    unsafe {
        let _ = libc::posix_fadvise(fd, 0, 0, libc::POSIX_FADV_SEQUENTIAL);
    }
}

#[cfg(not(target_family = "unix"))]
fn advise_file_sequential(_file: &File) {}

/// Read every trace of an SU file. All traces must share the first trace's `ns`.
pub fn read_su_file(path: &Path) -> Result<Vec<SuTrace>, DynError> {
    let file = File::open(path)
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
    advise_file_sequential(&file);
    let mut reader = BufReader::new(file);
    let mut traces: Vec<SuTrace> = Vec::new();
    while let Some(trace) = SuTrace::read_from(&mut reader)? {
        if let Some(first) = traces.first() {
            if trace.ns() != first.ns() {
                return Err(format!(
                    "Trace {} of {} has ns={} but the first trace has ns={}",
                    traces.len(),
                    path.display(),
                    trace.ns(),
                    first.ns()
                )
                .into());
            }
        }
        traces.push(trace);
    }
    Ok(traces)
}

/// Writes traces to `<path>.partial` and only moves the file to `path` in
/// [`SuWriter::finalize`], so an aborted run leaves no complete-looking output.
pub struct SuWriter {
    path: PathBuf,
    partial_path: PathBuf,
    writer: BufWriter<File>,
    traces_written: usize,
}

impl SuWriter {
    pub fn create(path: &Path) -> Result<Self, DynError> {
        let mut partial = path.as_os_str().to_owned();
        partial.push(".partial");
        let partial_path = PathBuf::from(partial);
        let file = File::create(&partial_path)
            .map_err(|e| format!("Failed to create {}: {e}", partial_path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            partial_path,
            writer: BufWriter::new(file),
            traces_written: 0,
        })
    }

    pub fn write_trace(&mut self, trace: &SuTrace) -> Result<(), DynError> {
        trace.write_to(&mut self.writer)?;
        self.traces_written += 1;
        Ok(())
    }

    pub fn traces_written(&self) -> usize {
        self.traces_written
    }

    /// Flush buffered traces and force them to disk, still under the `.partial` name.
    pub fn sync(&mut self) -> Result<(), DynError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    pub fn finalize(mut self) -> Result<PathBuf, DynError> {
        self.sync()?;
        std::fs::rename(&self.partial_path, &self.path).map_err(|e| {
            format!(
                "Failed to move {} to {}: {e}",
                self.partial_path.display(),
                self.path.display()
            )
        })?;
        Ok(self.path)
    }
}
