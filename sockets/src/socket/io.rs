//! Byte-stream adapters: a socket doubles as its own file object.

use alloc::vec::Vec;

use crate::error::Result;

use super::Socket;

impl Socket {
    /// File-like view of the socket; the socket itself.
    pub fn makefile(&self) -> &Self {
        self
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.recv(buf)
    }

    pub fn write(&self, data: &[u8]) -> Result<usize> {
        self.send(data)
    }

    /// Read up to and including the next `\n`, one byte at a time.
    ///
    /// Stops early at end of stream. If a non-blocking socket runs dry
    /// mid-line, the bytes read so far are returned.
    pub fn readline(&self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.recv(&mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    line.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Err(err) if err.is_would_block() && !line.is_empty() => break,
                Err(err) => return Err(err),
            }
        }
        Ok(line)
    }
}

#[cfg(feature = "std")]
mod std_io {
    use std::io;

    use super::Socket;

    impl io::Read for &Socket {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            Socket::read(self, buf).map_err(io::Error::from)
        }
    }

    impl io::Write for &Socket {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Socket::write(self, buf).map_err(io::Error::from)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl io::Read for Socket {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            Socket::read(self, buf).map_err(io::Error::from)
        }
    }

    impl io::Write for Socket {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Socket::write(self, buf).map_err(io::Error::from)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }
}
