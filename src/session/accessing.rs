use std::time::Duration;
use tokio::time::Instant;
use log::*;

use crate::{
    Error,
    mask,
    command::{self, Request},
    registers::{Register, Field, Width},
    utils::{hex, bin},
    };
use super::{Session, Link};


/// how a value relates to the bits of its mask
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Placement {
    /// value is right-aligned, its i-th bit goes to the i-th bit of the mask
    Packed,
    /// value bits are at their position in the register
    Direct,
}
impl Placement {
    fn extract(self, word: u32, mask: u32) -> u32 {
        match self {
            Self::Packed => mask::unpack(word, mask),
            Self::Direct => word & mask,
        }
    }
    fn insert(self, value: u32, mask: u32) -> u32 {
        match self {
            Self::Packed => mask::pack(value, mask),
            Self::Direct => value,
        }
    }
}

/// the device sees the containing word of unaligned addresses, which a recording would not reproduce
fn aligned(address: u32) -> Result<(), Error> {
    if address & 0b11 != 0 {
        warn!("refusing access to unaligned address {:#010x}", address);
        return Err(Error::Unaligned(address));
    }
    Ok(())
}


impl<L: Link> Session<L> {
    /// read a whole register
    pub async fn read(&mut self, register: &Register) -> Result<u32, Error> {
        self.read_masked(register.address, register.width, register.mask(), Placement::Direct, &register.path()).await
    }
    /// read a field, right-aligned
    pub async fn read_field(&mut self, field: &Field<'_>) -> Result<u32, Error> {
        let register = field.register;
        self.read_masked(register.address, register.width, field.mask, Placement::Packed, &field.path()).await
    }
    /// write a whole register
    pub async fn write(&mut self, register: &Register, value: u32) -> Result<(), Error> {
        let label = format!("{} = {}", register.path(), hex(value, register.width.bits()));
        self.write_masked(register.address, register.width, register.mask(), value, Placement::Direct, &label).await
    }
    /// write a right-aligned value in a field, leaving the rest of the register untouched
    pub async fn write_field(&mut self, field: &Field<'_>, value: u32) -> Result<(), Error> {
        let register = field.register;
        let label = format!("{} = {}", field.path(), bin(value, field.bits()));
        self.write_masked(register.address, register.width, field.mask, value, Placement::Packed, &label).await
    }
    /// restore a register to its reset value
    pub async fn reset(&mut self, register: &Register) -> Result<(), Error> {
        self.write(register, register.reset).await
    }
    /// restore a field to its reset value
    pub async fn reset_field(&mut self, field: &Field<'_>) -> Result<(), Error> {
        let register = field.register;
        let label = format!("{} = {}", field.path(), bin(field.reset(), field.bits()));
        self.write_masked(register.address, register.width, field.mask, register.reset, Placement::Direct, &label).await
    }

    /**
        poll a field until it reads `value`

        fails with [Error::WaitTimeout] when `timeout` expires first. Failed polling reads only count as a different value. In a recording, this becomes a busy loop on the field, a failed wait leaves no trace.
    */
    pub async fn wait_until(&mut self, field: &Field<'_>, value: u32, timeout: Duration) -> Result<(), Error> {
        if let Some(trace) = &mut self.trace {
            trace.wait_begin();
        }
        let result = self.poll(field, value, timeout).await;
        if let Some(trace) = &mut self.trace {
            match result {
                Ok(()) => {
                    let label = format!("{} == {}", field.path(), bin(value, field.bits()));
                    trace.wait_end(field.register.address, field.mask, value, label);
                },
                Err(_) => trace.wait_abort(),
            }
        }
        result
    }
    async fn poll(&mut self, field: &Field<'_>, value: u32, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.read_field(field).await {
                Ok(current) if current == value => return Ok(()),
                Ok(_) => {},
                Err(error @ (Error::Transport(_) | Error::Unaligned(_))) => return Err(error),
                Err(error) => debug!("polling {} failed: {}", field.path(), error),
            }
            if Instant::now() >= deadline {
                warn!("{} did not reach {} in {:?}", field.path(), value, timeout);
                return Err(Error::WaitTimeout);
            }
        }
    }

    /**
        read `width` bits at `address` and extract the bits of `mask`

        `address` must be word aligned. The input buffer is cleared before sending the request. Failed reads are attempted again as many times as [super::Config::retries] allows.
    */
    pub async fn read_masked(&mut self, address: u32, width: Width, mask: u32, placement: Placement, label: &str) -> Result<u32, Error> {
        aligned(address)?;
        let mut attempts = 0;
        let word = loop {
            match self.load(address, width).await {
                Ok(word) => break word,
                Err(error @ Error::Transport(_)) => return Err(error),
                Err(error) if attempts < self.config.retries => {
                    attempts += 1;
                    warn!("reading {} failed: {}, attempt {}", label, error, attempts);
                    if let Err(error @ Error::Transport(_)) = self.transport.resync().await
                        {return Err(error)}
                },
                Err(error) => {
                    warn!("reading {} failed: {}", label, error);
                    return Err(error);
                },
            }
        };
        if let Some(trace) = &mut self.trace {
            trace.read(address, width, label);
        }
        Ok(placement.extract(word, mask))
    }

    /**
        write `value` in the bits of `mask` at `address`

        `address` must be word aligned. 32 bit writes only modify the bits of `mask`. 8 and 16 bit writes are plain stores of the full width, the mask only serves to place a packed value.
    */
    pub async fn write_masked(&mut self, address: u32, width: Width, mask: u32, value: u32, placement: Placement, label: &str) -> Result<(), Error> {
        aligned(address)?;
        let value = placement.insert(value, mask);
        if width != Width::W32 && mask & width.mask() != width.mask() {
            debug!("{} bit write of {} overwrites bits outside of its mask", width.bits(), label);
        }
        self.transport.send(&Request::write(address, width, mask, value).encode()).await?;
        if let Some(trace) = &mut self.trace {
            trace.write(address, width, mask, value, label);
        }
        Ok(())
    }

    /// one read exchange, without retry
    async fn load(&mut self, address: u32, width: Width) -> Result<u32, Error> {
        let request = Request::read(address, width);
        self.transport.clear().await?;
        self.transport.send(&request.encode()).await?;
        let content = self.transport.receive(request.response_size()).await?;
        Ok(command::decode_value(&content, width))
    }
}
