//! libbz2-backed [`StreamLibrary`].
//!
//! Descriptors named in a request belong to the caller: they are duplicated
//! for the duration of the call and the duplicates are closed afterwards, so
//! the original descriptor stays open and keeps its shared file offset.

use bzip2::{Action, Compress, Compression, Decompress, Status};
use nix::fcntl::{fcntl, FcntlArg};
use std::ffi::CStr;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::BorrowedFd;

use super::codes::{
    BZ_DATA_ERROR, BZ_DATA_ERROR_MAGIC, BZ_IO_ERROR, BZ_MEM_ERROR, BZ_OK, BZ_PARAM_ERROR,
    BZ_SEQUENCE_ERROR, BZ_UNEXPECTED_EOF,
};
use super::StreamLibrary;

const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Stream library backed by the `bzip2` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Bzip2Library;

impl Bzip2Library {
    pub fn new() -> Self {
        Self
    }
}

impl StreamLibrary for Bzip2Library {
    fn compress_stream(
        &self,
        ifd: i32,
        ofd: i32,
        block_size_100k: i32,
        verbosity: i32,
        work_factor: i32,
    ) -> i32 {
        if !(1..=9).contains(&block_size_100k)
            || !(0..=4).contains(&verbosity)
            || !(0..=250).contains(&work_factor)
        {
            return BZ_PARAM_ERROR;
        }
        let result = open_pair(ifd, ofd).and_then(|(mut input, mut output)| {
            compress_io(
                &mut input,
                &mut output,
                block_size_100k as u32,
                work_factor as u32,
            )
        });
        finish("compress", verbosity, result)
    }

    fn decompress_stream(&self, ifd: i32, ofd: i32, verbosity: i32, small: i32) -> i32 {
        if !(0..=4).contains(&verbosity) || !(0..=1).contains(&small) {
            return BZ_PARAM_ERROR;
        }
        let result = open_pair(ifd, ofd).and_then(|(mut input, mut output)| {
            decompress_io(&mut input, &mut output, small == 1)
        });
        finish("decompress", verbosity, result)
    }

    fn test_stream(&self, ifd: i32, verbosity: i32, small: i32) -> i32 {
        if !(0..=4).contains(&verbosity) || !(0..=1).contains(&small) {
            return BZ_PARAM_ERROR;
        }
        let result = dup_descriptor(ifd)
            .map_err(StreamError::Io)
            .and_then(|mut input| decompress_io(&mut input, &mut io::sink(), small == 1));
        finish("test", verbosity, result)
    }

    fn lib_version(&self) -> String {
        linked_version()
    }
}

// bzip2-sys links libbz2 but does not re-export this symbol.
#[allow(unsafe_code)]
extern "C" {
    fn BZ2_bzlibVersion() -> *const std::os::raw::c_char;
}

/// Version string reported by the linked libbz2.
#[allow(unsafe_code)]
fn linked_version() -> String {
    // SAFETY: BZ2_bzlibVersion takes no arguments and returns a pointer to a
    // static NUL-terminated string.
    let raw = unsafe { BZ2_bzlibVersion() };
    if raw.is_null() {
        return String::new();
    }
    // SAFETY: non-null and static, checked above.
    unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
}

/// Byte counts of a finished stream operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Totals {
    pub bytes_in: u64,
    pub bytes_out: u64,
}

#[derive(Debug)]
pub(crate) enum StreamError {
    Io(io::Error),
    Sequence,
    Param,
    Memory,
    Data,
    DataMagic,
    UnexpectedEof,
}

impl StreamError {
    fn code(&self) -> i32 {
        match self {
            StreamError::Io(_) => BZ_IO_ERROR,
            StreamError::Sequence => BZ_SEQUENCE_ERROR,
            StreamError::Param => BZ_PARAM_ERROR,
            StreamError::Memory => BZ_MEM_ERROR,
            StreamError::Data => BZ_DATA_ERROR,
            StreamError::DataMagic => BZ_DATA_ERROR_MAGIC,
            StreamError::UnexpectedEof => BZ_UNEXPECTED_EOF,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Io(err)
    }
}

impl From<bzip2::Error> for StreamError {
    fn from(err: bzip2::Error) -> Self {
        match err {
            bzip2::Error::Sequence => StreamError::Sequence,
            bzip2::Error::Data => StreamError::Data,
            bzip2::Error::DataMagic => StreamError::DataMagic,
            bzip2::Error::Param => StreamError::Param,
        }
    }
}

fn finish(op: &str, verbosity: i32, result: Result<Totals, StreamError>) -> i32 {
    match result {
        Ok(totals) => {
            if verbosity > 0 {
                tracing::debug!(
                    bytes_in = totals.bytes_in,
                    bytes_out = totals.bytes_out,
                    "{} done",
                    op
                );
            }
            BZ_OK
        }
        Err(err) => {
            tracing::debug!(error = ?err, "{} failed", op);
            err.code()
        }
    }
}

fn open_pair(ifd: i32, ofd: i32) -> Result<(File, File), StreamError> {
    Ok((dup_descriptor(ifd)?, dup_descriptor(ofd)?))
}

/// Duplicate a descriptor from this process's table without taking
/// ownership of the original.
#[allow(unsafe_code)]
fn dup_descriptor(fd: i32) -> io::Result<File> {
    if fd < 0 {
        return Err(io::Error::from_raw_os_error(nix::libc::EBADF));
    }
    fcntl(fd, FcntlArg::F_GETFD).map_err(io::Error::from)?;
    // SAFETY: F_GETFD just succeeded, so `fd` is open; the borrow ends before
    // this function returns and only a duplicate escapes.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    Ok(File::from(borrowed.try_clone_to_owned()?))
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Compress everything from `input` into a single bzip2 stream on `output`.
pub(crate) fn compress_io<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    block_size_100k: u32,
    work_factor: u32,
) -> Result<Totals, StreamError> {
    let mut stream = Compress::new(Compression::new(block_size_100k), work_factor);
    let mut inbuf = vec![0u8; IO_BUFFER_SIZE];
    let mut outbuf = vec![0u8; IO_BUFFER_SIZE];

    loop {
        let n = read_some(input, &mut inbuf)?;
        let action = if n == 0 { Action::Finish } else { Action::Run };
        let mut consumed = 0;
        loop {
            let (in_before, out_before) = (stream.total_in(), stream.total_out());
            let status = stream.compress(&inbuf[consumed..n], &mut outbuf, action)?;
            consumed += (stream.total_in() - in_before) as usize;
            let produced = (stream.total_out() - out_before) as usize;
            output.write_all(&outbuf[..produced])?;

            if matches!(status, Status::StreamEnd) {
                output.flush()?;
                return Ok(Totals {
                    bytes_in: stream.total_in(),
                    bytes_out: stream.total_out(),
                });
            }
            if n > 0 && consumed == n {
                break;
            }
        }
    }
}

/// Decompress one or more concatenated bzip2 streams from `input`.
///
/// Bytes that follow a complete stream and do not start with a bzip2 header
/// are ignored.
pub(crate) fn decompress_io<R: Read, W: Write>(
    input: &mut R,
    output: &mut W,
    small: bool,
) -> Result<Totals, StreamError> {
    let mut stream = Decompress::new(small);
    let mut inbuf = vec![0u8; IO_BUFFER_SIZE];
    let mut outbuf = vec![0u8; IO_BUFFER_SIZE];
    let (mut start, mut end) = (0usize, 0usize);
    let mut totals = Totals {
        bytes_in: 0,
        bytes_out: 0,
    };
    let mut streams_done = 0u32;
    let mut draining = false;

    loop {
        if start == end && !draining {
            start = 0;
            end = read_some(input, &mut inbuf)?;
            if end == 0 {
                // Clean only at a stream boundary: the fresh decoder has not
                // been fed any part of a following stream.
                if streams_done > 0 && stream.total_in() == 0 {
                    output.flush()?;
                    return Ok(totals);
                }
                return Err(StreamError::UnexpectedEof);
            }
        }

        let (in_before, out_before) = (stream.total_in(), stream.total_out());
        let status = match stream.decompress(&inbuf[start..end], &mut outbuf) {
            Ok(status) => status,
            Err(bzip2::Error::DataMagic) if streams_done > 0 => {
                tracing::debug!("trailing garbage after bzip2 data ignored");
                output.flush()?;
                return Ok(totals);
            }
            Err(err) => return Err(err.into()),
        };
        let consumed = (stream.total_in() - in_before) as usize;
        let produced = (stream.total_out() - out_before) as usize;
        start += consumed;
        output.write_all(&outbuf[..produced])?;
        totals.bytes_in += consumed as u64;
        totals.bytes_out += produced as u64;
        draining = produced == outbuf.len();

        match status {
            Status::StreamEnd => {
                streams_done += 1;
                stream = Decompress::new(small);
                draining = false;
            }
            Status::MemNeeded => return Err(StreamError::Memory),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Seek, SeekFrom};
    use std::os::fd::AsRawFd;

    fn compressed(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        compress_io(&mut Cursor::new(data), &mut out, 9, 30).unwrap();
        out
    }

    fn file_with(data: &[u8]) -> File {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(data).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        file
    }

    fn read_back(file: &mut File) -> Vec<u8> {
        let mut out = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_descriptor_round_trip() {
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let lib = Bzip2Library::new();

        let input = file_with(&data);
        let mut packed = tempfile::tempfile().unwrap();
        let rc = lib.compress_stream(input.as_raw_fd(), packed.as_raw_fd(), 9, 0, 30);
        assert_eq!(rc, BZ_OK);

        let packed_bytes = read_back(&mut packed);
        assert_eq!(&packed_bytes[..3], b"BZh");

        let packed_input = file_with(&packed_bytes);
        let mut unpacked = tempfile::tempfile().unwrap();
        let rc = lib.decompress_stream(packed_input.as_raw_fd(), unpacked.as_raw_fd(), 0, 0);
        assert_eq!(rc, BZ_OK);
        assert_eq!(read_back(&mut unpacked), data);
    }

    #[test]
    fn test_caller_descriptors_stay_open() {
        let lib = Bzip2Library::new();
        let input = file_with(b"hello");
        let output = tempfile::tempfile().unwrap();
        assert_eq!(
            lib.compress_stream(input.as_raw_fd(), output.as_raw_fd(), 1, 0, 0),
            BZ_OK
        );
        assert!(fcntl(input.as_raw_fd(), FcntlArg::F_GETFD).is_ok());
        assert!(fcntl(output.as_raw_fd(), FcntlArg::F_GETFD).is_ok());
    }

    #[test]
    fn test_parameter_ranges() {
        let lib = Bzip2Library::new();
        assert_eq!(lib.compress_stream(0, 1, 0, 0, 30), BZ_PARAM_ERROR);
        assert_eq!(lib.compress_stream(0, 1, 10, 0, 30), BZ_PARAM_ERROR);
        assert_eq!(lib.compress_stream(0, 1, 9, 5, 30), BZ_PARAM_ERROR);
        assert_eq!(lib.compress_stream(0, 1, 9, 0, 251), BZ_PARAM_ERROR);
        assert_eq!(lib.decompress_stream(0, 1, 0, 2), BZ_PARAM_ERROR);
        assert_eq!(lib.test_stream(0, -1, 0), BZ_PARAM_ERROR);
    }

    #[test]
    fn test_bad_descriptor_is_io_error() {
        let lib = Bzip2Library::new();
        assert_eq!(lib.test_stream(-1, 0, 0), BZ_IO_ERROR);

        assert_eq!(lib.test_stream(1 << 20, 0, 0), BZ_IO_ERROR);
    }

    #[test]
    fn test_stream_integrity_codes() {
        let lib = Bzip2Library::new();
        let good = compressed(b"some payload");

        let input = file_with(&good);
        assert_eq!(lib.test_stream(input.as_raw_fd(), 0, 1), BZ_OK);

        let input = file_with(b"definitely not bzip2");
        assert_eq!(lib.test_stream(input.as_raw_fd(), 0, 0), BZ_DATA_ERROR_MAGIC);

        let input = file_with(&good[..good.len() / 2]);
        assert_eq!(lib.test_stream(input.as_raw_fd(), 0, 0), BZ_UNEXPECTED_EOF);

        let input = file_with(b"");
        assert_eq!(lib.test_stream(input.as_raw_fd(), 0, 0), BZ_UNEXPECTED_EOF);
    }

    #[test]
    fn test_corrupted_block_is_data_error() {
        // Stream header is 4 bytes, block magic 6; the block CRC follows.
        let mut bad = compressed(&[7u8; 4096]);
        bad[10] ^= 0xFF;
        let err = decompress_io(&mut Cursor::new(bad), &mut io::sink(), false).unwrap_err();
        assert_eq!(err.code(), BZ_DATA_ERROR);
    }

    #[test]
    fn test_concatenated_streams_and_trailing_garbage() {
        let mut data = compressed(b"first ");
        data.extend(compressed(b"second"));
        data.extend_from_slice(b"garbage!");

        let mut out = Vec::new();
        let totals = decompress_io(&mut Cursor::new(data), &mut out, false).unwrap();
        assert_eq!(out, b"first second");
        assert_eq!(totals.bytes_out, 12);
    }

    #[test]
    fn test_truncated_second_stream_is_unexpected_eof() {
        let second: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 253) as u8).collect();
        let second = compressed(&second);
        let mut data = compressed(b"first");
        data.extend_from_slice(&second[..second.len() / 2]);

        let err = decompress_io(&mut Cursor::new(data.clone()), &mut Vec::new(), false).unwrap_err();
        assert_eq!(err.code(), BZ_UNEXPECTED_EOF);

        let lib = Bzip2Library::new();
        let input = file_with(&data);
        assert_eq!(lib.test_stream(input.as_raw_fd(), 0, 0), BZ_UNEXPECTED_EOF);
    }

    #[test]
    fn test_empty_input_compresses_to_valid_stream() {
        let packed = compressed(b"");
        let mut out = Vec::new();
        decompress_io(&mut Cursor::new(packed), &mut out, true).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_lib_version_is_stable() {
        let lib = Bzip2Library::new();
        let version = lib.lib_version();
        assert_eq!(version, lib.lib_version());
        assert!(version.starts_with("1.0."), "version: {}", version);
        assert!(version.contains(','), "version: {}", version);
    }
}
