use std::{
    io,
    time::Duration,
    collections::{HashMap, VecDeque},
    };
use log::*;

use crate::{
    command::{self, Request, Operation, ENVELOPE, MAX_REQUEST, SYNC_REQUEST, SYNC_ACK},
    };
use super::Link;


/**
    device executing requests in process, against a sparse memory initialized to zero

    it behaves like the firmware side of the protocol: enveloped requests with a bad checksum are dropped silently, reads are answered with an enveloped response, resynchronization markers are acknowledged. Useful to record accesses without hardware, and for testing.
*/
#[derive(Debug, Default)]
pub struct Simulator {
    /// 32 bit words by aligned address
    memory: HashMap<u32, u32>,
    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    /// number of answers to drop, simulating a deaf device
    silenced: usize,
    requests: usize,
    syncs: usize,
}
impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }
    /// current value of the word containing `address`
    pub fn peek(&self, address: u32) -> u32 {
        self.memory.get(&(address & !0b11)).copied().unwrap_or(0)
    }
    /// set the word containing `address`
    pub fn poke(&mut self, address: u32, value: u32) {
        self.memory.insert(address & !0b11, value);
    }
    /// drop the next `count` answers, responses and acknowledgements alike
    pub fn silence(&mut self, count: usize) {
        self.silenced = count;
    }
    /// number of valid requests executed
    pub fn requests(&self) -> usize  {self.requests}
    /// number of resynchronizations acknowledged or silenced
    pub fn syncs(&self) -> usize  {self.syncs}

    fn answer(&mut self, data: &[u8]) {
        if self.silenced > 0 {
            self.silenced -= 1;
            return;
        }
        self.outbound.extend(data);
    }

    fn process(&mut self) {
        loop {
            if self.inbound.starts_with(&SYNC_REQUEST) {
                self.inbound.drain(.. SYNC_REQUEST.len());
                self.syncs += 1;
                self.answer(&SYNC_ACK);
                continue
            }
            if self.inbound.len() < 2
                {break}
            let size = usize::from(u16::from_le_bytes([self.inbound[0], self.inbound[1]]));
            if size > MAX_REQUEST {
                warn!("simulator lost frame alignment, dropping {} bytes", self.inbound.len());
                self.inbound.clear();
                break
            }
            if self.inbound.len() < size + ENVELOPE
                {break}
            let frame: Vec<u8> = self.inbound.drain(.. size + ENVELOPE).collect();
            match command::open_envelope(&frame, size).ok().and_then(Request::decode) {
                Some(request) => self.execute(request),
                None => warn!("simulator dropped invalid request {:02x?}", frame),
            }
        }
    }

    fn execute(&mut self, request: Request) {
        debug!("simulator executes {:?}", request);
        self.requests += 1;
        let address = request.address;
        let word = self.peek(address);
        let bit = |position: u8|  1u32.checked_shl(u32::from(position)).unwrap_or(0);
        let updated = match request.operation {
            Operation::Load(width) => {
                let value = (word & width.mask()).to_le_bytes();
                if let Ok(frame) = command::envelope(&value[.. width.bytes()]) {
                    self.answer(&frame);
                }
                return
            },
            Operation::Store(width, value) => (word & !width.mask()) | (value & width.mask()),
            Operation::SetBit(position) => word | bit(position),
            Operation::ClearBit(position) => word & !bit(position),
            Operation::SetMask(mask) => word | mask,
            Operation::ClearMask(mask) => word & !mask,
            Operation::Modify {mask, value} => (word & !mask) | value,
        };
        self.poke(address, updated);
    }
}

impl Link for Simulator {
    async fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.inbound.extend_from_slice(data);
        self.process();
        Ok(())
    }
    async fn receive(&mut self, buffer: &mut [u8], _timeout: Duration) -> io::Result<usize> {
        // nothing more can arrive while the host is waiting
        let size = buffer.len().min(self.outbound.len());
        for (dst, src) in buffer.iter_mut().zip(self.outbound.drain(.. size)) {
            *dst = src;
        }
        Ok(size)
    }
    async fn discard(&mut self) -> io::Result<()> {
        self.outbound.clear();
        Ok(())
    }
}
