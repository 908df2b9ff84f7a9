use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;

use crate::connection::Connection;

impl Connection for TcpStream {
    type Error = std::io::Error;

    fn read(&mut self) -> Result<Option<u8>, Self::Error> {
        let mut buf = [0u8];
        loop {
            match Read::read(self, &mut buf) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(buf[0])),
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn peek(&mut self) -> Result<Option<u8>, Self::Error> {
        let mut buf = [0u8];
        match TcpStream::peek(self, &mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buf[0])),
            Err(e) => Err(e),
        }
    }

    fn poll_byte(&mut self) -> Result<Option<u8>, Self::Error> {
        self.set_nonblocking(true)?;

        let mut buf = [0u8];
        let res = match TcpStream::peek(self, &mut buf) {
            Ok(0) => Err(ErrorKind::UnexpectedEof.into()),
            Ok(_) => Ok(Some(buf[0])),
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        };

        self.set_nonblocking(false)?;

        res
    }

    fn write(&mut self, byte: u8) -> Result<(), Self::Error> {
        Write::write_all(self, &[byte])
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        Write::write_all(self, buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Write::flush(self)
    }

    fn on_session_start(&mut self) -> Result<(), Self::Error> {
        self.set_nonblocking(false)?;
        // Stop replies and F-packets are latency-sensitive.
        self.set_nodelay(true)?;
        Ok(())
    }
}
