//! Everything the I/O primitives touch outside the heap: file handles, raw memory blocks
//! and the program arguments.
//!
//! Handles are small integers. `0`, `1` and `2` are the standard streams, opened files get
//! the next free slot. Pointers are `(block + 1) << 32 | word offset`, so `0` is never a
//! valid address.

use std::{
    cell::RefCell,
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    rc::Rc,
};

use super::primitive::Primitive;
use crate::error::RuntimeError;

pub const STDIN: i64 = 0;
pub const STDOUT: i64 = 1;
pub const STDERR: i64 = 2;

/// Value returned by `IO.hGetChar` at the end of the input.
pub const EOF: i64 = -1;

enum Channel {
    Input(Box<dyn BufRead>),
    Output(Box<dyn Write>),
}

/// An output buffer that can be inspected after the program ran.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn failure(prim: Primitive, msg: impl ToString) -> RuntimeError {
    RuntimeError::Foreign {
        prim: prim.name(),
        msg: msg.to_string(),
    }
}

pub struct World {
    handles: Vec<Option<Channel>>,
    blocks: Vec<Option<Vec<i64>>>,
    args: Vec<String>,
}

impl World {
    /// A world connected to the process' standard streams.
    pub fn stdio(args: Vec<String>) -> Self {
        Self::with_streams(
            BufReader::new(io::stdin()),
            BufWriter::new(io::stdout()),
            io::stderr(),
            args,
        )
    }

    pub fn with_streams(
        input: impl BufRead + 'static,
        output: impl Write + 'static,
        error: impl Write + 'static,
        args: Vec<String>,
    ) -> Self {
        Self {
            handles: vec![
                Some(Channel::Input(Box::new(input))),
                Some(Channel::Output(Box::new(output))),
                Some(Channel::Output(Box::new(error))),
            ],
            blocks: Vec::new(),
            args,
        }
    }

    /// A world reading `input` whose standard output and error are captured.
    pub fn captured(input: &str) -> (Self, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err = SharedBuffer::default();
        let world = Self::with_streams(
            io::Cursor::new(input.as_bytes().to_vec()),
            out.clone(),
            err.clone(),
            Vec::new(),
        );
        (world, out, err)
    }

    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn channel(&mut self, prim: Primitive, handle: i64) -> Result<&mut Channel, RuntimeError> {
        usize::try_from(handle)
            .ok()
            .and_then(|h| self.handles.get_mut(h))
            .and_then(Option::as_mut)
            .ok_or_else(|| failure(prim, format!("invalid or closed handle {}", handle)))
    }

    /// Next character as a code point, `EOF` at the end of the input.
    pub fn get_char(&mut self, handle: i64) -> Result<i64, RuntimeError> {
        let prim = Primitive::HGetChar;
        let reader = match self.channel(prim, handle)? {
            Channel::Input(reader) => reader,
            Channel::Output(_) => return Err(failure(prim, "handle is not readable")),
        };
        let mut buf = [0u8; 4];
        if reader.read(&mut buf[..1]).map_err(|e| failure(prim, e))? == 0 {
            return Ok(EOF);
        }
        let len = match buf[0] {
            0x00..=0x7f => 1,
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return Err(failure(prim, "invalid UTF-8 input")),
        };
        reader
            .read_exact(&mut buf[1..len])
            .map_err(|e| failure(prim, e))?;
        let s = std::str::from_utf8(&buf[..len]).map_err(|e| failure(prim, e))?;
        Ok(s.chars().next().map_or(EOF, |c| c as i64))
    }

    pub fn put_char(&mut self, handle: i64, c: char) -> Result<(), RuntimeError> {
        let prim = Primitive::HPutChar;
        match self.channel(prim, handle)? {
            Channel::Output(writer) => {
                let mut buf = [0u8; 4];
                writer
                    .write_all(c.encode_utf8(&mut buf).as_bytes())
                    .map_err(|e| failure(prim, e))
            }
            Channel::Input(_) => Err(failure(prim, "handle is not writable")),
        }
    }

    pub fn flush(&mut self, handle: i64) -> Result<(), RuntimeError> {
        let prim = Primitive::HFlush;
        match self.channel(prim, handle)? {
            Channel::Output(writer) => writer.flush().map_err(|e| failure(prim, e)),
            Channel::Input(_) => Ok(()),
        }
    }

    /// Flush every open output handle.
    pub fn flush_all(&mut self) -> Result<(), RuntimeError> {
        for channel in self.handles.iter_mut().flatten() {
            if let Channel::Output(writer) = channel {
                writer.flush().map_err(|e| failure(Primitive::HFlush, e))?;
            }
        }
        Ok(())
    }

    /// Open `path` for reading (mode 0), writing (1) or appending (2).
    pub fn open(&mut self, path: &str, mode: i64) -> Result<i64, RuntimeError> {
        let prim = Primitive::OpenFile;
        let channel = match mode {
            0 => Channel::Input(Box::new(BufReader::new(
                File::open(path).map_err(|e| failure(prim, format!("{}: {}", path, e)))?,
            ))),
            1 | 2 => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(mode == 1)
                    .append(mode == 2)
                    .open(path)
                    .map_err(|e| failure(prim, format!("{}: {}", path, e)))?;
                Channel::Output(Box::new(BufWriter::new(file)))
            }
            _ => return Err(failure(prim, format!("unknown mode {}", mode))),
        };
        let slot = match self.handles.iter().position(Option::is_none) {
            Some(slot) => {
                self.handles[slot] = Some(channel);
                slot
            }
            None => {
                self.handles.push(Some(channel));
                self.handles.len() - 1
            }
        };
        Ok(slot as i64)
    }

    pub fn close(&mut self, handle: i64) -> Result<(), RuntimeError> {
        let prim = Primitive::HClose;
        if let Channel::Output(writer) = self.channel(prim, handle)? {
            writer.flush().map_err(|e| failure(prim, e))?;
        }
        self.handles[handle as usize] = None;
        Ok(())
    }

    pub fn malloc(&mut self, words: i64) -> Result<u64, RuntimeError> {
        let words = usize::try_from(words)
            .map_err(|_| failure(Primitive::Malloc, format!("negative size {}", words)))?;
        self.blocks.push(Some(vec![0; words]));
        Ok((self.blocks.len() as u64) << 32)
    }

    pub fn free(&mut self, ptr: u64) -> Result<(), RuntimeError> {
        let prim = Primitive::Free;
        let block = (ptr >> 32) as usize;
        if ptr & 0xffff_ffff != 0 || block == 0 {
            return Err(failure(prim, format!("{:#x} is not the start of a block", ptr)));
        }
        match self.blocks.get_mut(block - 1) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(failure(prim, format!("{:#x} is not allocated", ptr))),
        }
    }

    fn word(&mut self, prim: Primitive, ptr: u64) -> Result<&mut i64, RuntimeError> {
        let block = (ptr >> 32) as usize;
        let offset = (ptr & 0xffff_ffff) as usize;
        block
            .checked_sub(1)
            .and_then(|b| self.blocks.get_mut(b))
            .and_then(Option::as_mut)
            .and_then(|words| words.get_mut(offset))
            .ok_or_else(|| failure(prim, format!("invalid address {:#x}", ptr)))
    }

    pub fn peek(&mut self, ptr: u64) -> Result<i64, RuntimeError> {
        self.word(Primitive::Peek, ptr).map(|w| *w)
    }

    pub fn poke(&mut self, ptr: u64, value: i64) -> Result<(), RuntimeError> {
        *self.word(Primitive::Poke, ptr)? = value;
        Ok(())
    }
}
