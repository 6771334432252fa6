/*!
    wire codec for register access commands

    A request is a fixed header followed by a payload depending on the operation
    ```text
    | sentinel "_:" (2) | address with flags (4) | payload (0-8) |
    ```
    the 2 low bits of the address are [Flags] selecting the operation together with the payload size, the device dispatches on both:

    | operation            | flags | payload                    |
    |----------------------|-------|----------------------------|
    | 32 bit read          | 00    |                            |
    |  8 bit read          | 01    |                            |
    | 16 bit read          | 10    |                            |
    |  8 bit write         | 01    | value (1)                  |
    | 16 bit write         | 00    | value (2)                  |
    | 32 bit write         | 00    | value (4)                  |
    | single bit set       | 00    | position (1)               |
    | single bit clear     | 10    | position (1)               |
    | set bits (or)        | 01    | mask (4)                   |
    | clear bits (and)     | 10    | inverted mask (4)          |
    | modify masked bits   | 00    | mask (4), value (4)        |

    Requests and responses travel in the same envelope, protected by a [checksum]
    ```text
    | length (2) | content (length) | crc16 (2) |
    ```
    all multi-byte integers are little endian
*/

use bilge::prelude::*;
use packbytes::{FromBytes, ToBytes, ByteArray};

use crate::{
    Error,
    pack_bilge,
    mask::{self, Idiom},
    registers::Width,
    };


/// first bytes of every request
pub const SENTINEL: [u8; 2] = *b"_:";
/// sent to the device to realign frames
pub const SYNC_REQUEST: [u8; 2] = [0x55, 0xAA];
/// answered by the device to a [SYNC_REQUEST]
pub const SYNC_ACK: [u8; 2] = *b"OK";
/// maximum number of bytes sent to the device before a resynchronization is required
pub const BUDGET: usize = 1040;
/// length and checksum fields around a frame content
pub const ENVELOPE: usize = 4;
/// largest request content
pub const MAX_REQUEST: usize = HEADER + 8;
/// size of the request header
pub const HEADER: usize = <<Header as ToBytes>::Bytes as ByteArray>::SIZE;


/// CRC-16/CCITT, polynomial 0x1021, null initial value, no reflection, no final xor
pub fn checksum(data: &[u8]) -> u16 {
    const POLYNOMIAL: u16 = 0x1021;
    data.iter().fold(0, |crc, &byte| {
        let mut crc = crc ^ (u16::from(byte) << 8);
        for _ in 0 .. 8 {
            crc = if crc & 0x8000 != 0
                {(crc << 1) ^ POLYNOMIAL}
                else {crc << 1};
        }
        crc
    })
}

/// wrap a frame content into a length and checksum envelope
pub fn envelope(content: &[u8]) -> Result<Vec<u8>, Error> {
    let size = u16::try_from(content.len())
        .map_err(|_|  Error::Oversized(content.len() + ENVELOPE))?;
    let mut frame = Vec::with_capacity(content.len() + ENVELOPE);
    frame.extend_from_slice(&size.to_le_bytes());
    frame.extend_from_slice(content);
    frame.extend_from_slice(&checksum(content).to_le_bytes());
    Ok(frame)
}

/**
    extract the content of an enveloped frame of `expected` content bytes

    the content is only returned once length and checksum are consistent
*/
pub fn open_envelope(frame: &[u8], expected: usize) -> Result<&[u8], Error> {
    if frame.is_empty()
        {return Err(Error::Timeout)}
    let framing = Error::Framing {expected: expected + ENVELOPE, received: frame.len()};
    if frame.len() != expected + ENVELOPE
        {return Err(framing)}
    let (size, rest) = frame.split_at(2);
    let (content, crc) = rest.split_at(expected);
    if usize::from(u16::from_le_bytes([size[0], size[1]])) != expected
        {return Err(framing)}
    if checksum(content) != u16::from_le_bytes([crc[0], crc[1]])
        {return Err(Error::Integrity)}
    Ok(content)
}


/// low bits of an address selecting the variant of operation
#[bitsize(2)]
#[derive(Copy, Clone, FromBits, Debug, PartialEq, Eq)]
pub enum Flags {
    /// 32 bit read, 16 and 32 bit store, bit set, masked modify
    Word = 0b00,
    /// 8 bit read and store, or
    Byte = 0b01,
    /// 16 bit read, bit clear, and
    Half = 0b10,
    Reserved = 0b11,
}
impl Flags {
    /// flags selecting a read of the given width
    pub fn read(width: Width) -> Self {
        match width {
            Width::W32 => Self::Word,
            Width::W8 => Self::Byte,
            Width::W16 => Self::Half,
        }
    }
}

/// device address with its 2 low bits replaced by [Flags]
#[bitsize(32)]
#[derive(Copy, Clone, FromBits, DebugBits, PartialEq)]
pub struct FlaggedAddress {
    pub flags: Flags,
    /// address of the 32 bit word containing the target
    pub word: u30,
}
pack_bilge!(FlaggedAddress, u32);
impl FlaggedAddress {
    /// flag an address, the address low bits are lost
    pub fn flag(address: u32, flags: Flags) -> Self {
        Self::new(flags, u30::new(address >> 2))
    }
    /// target address, with the low bits cleared
    pub fn address(&self) -> u32 {
        self.word().value() << 2
    }
}

/// fixed part of every request
#[derive(Copy, Clone, FromBytes, ToBytes, Debug)]
pub struct Header {
    pub sentinel: u16,
    pub address: FlaggedAddress,
}


/// operation executed by the device on one register
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// read a value and answer it
    Load(Width),
    /// plain store of a value
    Store(Width, u32),
    /// set one bit
    SetBit(u8),
    /// clear one bit
    ClearBit(u8),
    /// set the bits of a mask
    SetMask(u32),
    /// clear the bits of a mask
    ClearMask(u32),
    /// replace the bits of mask by those of value
    Modify {mask: u32, value: u32},
}

/// one access to a register, as sent on the wire
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub address: u32,
    pub operation: Operation,
}
impl Request {
    pub fn read(address: u32, width: Width) -> Self {
        Self {address, operation: Operation::Load(width)}
    }
    /**
        write the positioned `value` in the bits of `mask`

        32 bit writes are reduced to the cheapest [Idiom] realizing them. 8 and 16 bit writes are always plain stores of `value`, regardless of the mask.
    */
    pub fn write(address: u32, width: Width, mask: u32, value: u32) -> Self {
        let operation = match width {
            Width::W8 | Width::W16 => Operation::Store(width, value & width.mask()),
            Width::W32 => match mask::classify(mask, value) {
                Idiom::WriteOnly => Operation::Store(width, value),
                Idiom::SingleSet(bit) => Operation::SetBit(bit),
                Idiom::SingleClear(bit) => Operation::ClearBit(bit),
                Idiom::SetOnly => Operation::SetMask(mask),
                Idiom::ClearOnly => Operation::ClearMask(mask),
                Idiom::FullModify {mask, value} => Operation::Modify {mask, value},
            },
        };
        Self {address, operation}
    }
    /// number of bytes the device answers to this request
    pub fn response_size(&self) -> usize {
        match self.operation {
            Operation::Load(width) => width.bytes(),
            _ => 0,
        }
    }

    /// serialize to the request wire format, without envelope
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(8);
        let flags = match self.operation {
            Operation::Load(width) => Flags::read(width),
            Operation::Store(Width::W8, value) => {
                payload.push(value as u8);
                Flags::Byte
            },
            Operation::Store(Width::W16, value) => {
                payload.extend_from_slice(&(value as u16).to_le_bytes());
                Flags::Word
            },
            Operation::Store(Width::W32, value) => {
                payload.extend_from_slice(&value.to_le_bytes());
                Flags::Word
            },
            Operation::SetBit(bit) => {
                payload.push(bit);
                Flags::Word
            },
            Operation::ClearBit(bit) => {
                payload.push(bit);
                Flags::Half
            },
            Operation::SetMask(mask) => {
                payload.extend_from_slice(&mask.to_le_bytes());
                Flags::Byte
            },
            Operation::ClearMask(mask) => {
                payload.extend_from_slice(&(!mask).to_le_bytes());
                Flags::Half
            },
            Operation::Modify {mask, value} => {
                payload.extend_from_slice(&mask.to_le_bytes());
                payload.extend_from_slice(&(value & mask).to_le_bytes());
                Flags::Word
            },
        };
        let header = Header {
            sentinel: u16::from_le_bytes(SENTINEL),
            address: FlaggedAddress::flag(self.address, flags),
            };
        let mut frame = Vec::with_capacity(HEADER + payload.len());
        frame.extend_from_slice(header.to_le_bytes().as_ref());
        frame.extend_from_slice(&payload);
        frame
    }

    /// parse a request the way the device does, `None` if it is not a valid request
    pub fn decode(frame: &[u8]) -> Option<Self> {
        if frame.len() < HEADER
            {return None}
        let (header, payload) = frame.split_at(HEADER);
        let header = Header::from_le_bytes(header.try_into().ok()?);
        if header.sentinel.to_le_bytes() != SENTINEL
            {return None}
        let word = |start: usize| -> u32 {
            u32::from_le_bytes([payload[start], payload[start+1], payload[start+2], payload[start+3]])
        };
        let operation = match (payload.len(), header.address.flags()) {
            (0, Flags::Reserved) => return None,
            (0, flags) => Operation::Load(match flags {
                Flags::Byte => Width::W8,
                Flags::Half => Width::W16,
                _ => Width::W32,
                }),
            (1, Flags::Byte) => Operation::Store(Width::W8, u32::from(payload[0])),
            (1, Flags::Word) => Operation::SetBit(payload[0]),
            (1, Flags::Half) => Operation::ClearBit(payload[0]),
            (2, Flags::Word) => Operation::Store(Width::W16, u32::from(u16::from_le_bytes([payload[0], payload[1]]))),
            (4, Flags::Word) => Operation::Store(Width::W32, word(0)),
            (4, Flags::Byte) => Operation::SetMask(word(0)),
            (4, Flags::Half) => Operation::ClearMask(!word(0)),
            (8, Flags::Word) => Operation::Modify {mask: word(0), value: word(4)},
            _ => return None,
        };
        Some(Self {address: header.address.address(), operation})
    }
}

/// assemble a little endian value of `width` from response bytes
pub fn decode_value(content: &[u8], width: Width) -> u32 {
    content.iter()
        .take(width.bytes())
        .rev()
        .fold(0, |value, &byte|  (value << 8) | u32::from(byte))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_check_value() {
        assert_eq!(checksum(b"123456789"), 0x31C3);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn checksum_detects_flips() {
        let mut undetected = 0;
        for _ in 0 .. 1000 {
            let mut data: Vec<u8> = (0 .. 16).map(|_| rand::random::<u8>()).collect();
            let reference = checksum(&data);
            let bit = rand::random::<u32>() as usize % (data.len() * 8);
            data[bit / 8] ^= 1 << (bit % 8);
            if checksum(&data) == reference
                {undetected += 1}
        }
        assert_eq!(undetected, 0, "single bit flips must change the checksum");
    }

    #[test]
    fn single_bit_set() {
        let request = Request::write(0x4001_0000, Width::W32, 0x8, 0x8);
        assert_eq!(request.operation, Operation::SetBit(3));
        assert_eq!(request.encode(), [b'_', b':', 0x00, 0x00, 0x01, 0x40, 3]);
        assert_eq!(request.response_size(), 0);
    }

    #[test]
    fn read_flags() {
        assert_eq!(Request::read(0x4002_1000, Width::W32).encode(), [b'_', b':', 0x00, 0x10, 0x02, 0x40]);
        assert_eq!(Request::read(0x4002_1000, Width::W8).encode(), [b'_', b':', 0x01, 0x10, 0x02, 0x40]);
        assert_eq!(Request::read(0x4002_1000, Width::W16).encode(), [b'_', b':', 0x02, 0x10, 0x02, 0x40]);
        assert_eq!(Request::read(0x4002_1000, Width::W16).response_size(), 2);
    }

    #[test]
    fn write_payloads() {
        let address = 0x2000_0000;
        let cases: &[(Width, u32, u32, &[u8])] = &[
            (Width::W32, u32::MAX, 0x1234_5678, &[0x78, 0x56, 0x34, 0x12]),
            (Width::W32, 0x10, 0, &[4]),
            (Width::W32, 0xf0, 0xf0, &[0xf0, 0, 0, 0]),
            (Width::W32, 0xf0, 0, &[0x0f, 0xff, 0xff, 0xff]),
            (Width::W32, 0xf0, 0x30, &[0xf0, 0, 0, 0, 0x30, 0, 0, 0]),
            // narrow writes ignore the mask
            (Width::W8, 0x0f, 0xab, &[0xab]),
            (Width::W16, 0x0f, 0xabcd, &[0xcd, 0xab]),
        ];
        for &(width, mask, value, payload) in cases {
            let frame = Request::write(address, width, mask, value).encode();
            assert_eq!(&frame[HEADER ..], payload, "{width:?} {mask:#x} {value:#x}");
        }
        let flags = |width, mask, value| Request::write(address, width, mask, value).encode()[2] & 0b11;
        assert_eq!(flags(Width::W32, 0x10, 0), 0b10);
        assert_eq!(flags(Width::W32, 0xf0, 0xf0), 0b01);
        assert_eq!(flags(Width::W32, 0xf0, 0), 0b10);
        assert_eq!(flags(Width::W8, 0xff, 1), 0b01);
        assert_eq!(flags(Width::W16, 0xffff, 1), 0b00);
    }

    #[test]
    fn device_view() {
        let requests = [
            Request::read(0x4000_0000, Width::W8),
            Request::read(0x4000_0004, Width::W32),
            Request::write(0x4000_0008, Width::W16, 0xffff, 0xbeef),
            Request::write(0x4000_000c, Width::W32, 0xff00, 0),
            Request::write(0x4000_000c, Width::W32, 0xff00, 0x1200),
            Request::write(0x4000_000c, Width::W32, 1 << 31, 0),
        ];
        for request in requests {
            assert_eq!(Request::decode(&request.encode()), Some(request));
        }
        assert_eq!(Request::decode(b"_:\x00\x00"), None);
        assert_eq!(Request::decode(b"xx\x00\x00\x00\x40"), None);
        assert_eq!(Request::decode(b"_:\x03\x00\x00\x40"), None);
    }

    #[test]
    fn response_envelope() {
        let frame = envelope(&[0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(frame.len(), 8);
        assert_eq!(&frame[.. 2], &[4, 0]);
        let content = open_envelope(&frame, 4).unwrap();
        assert_eq!(decode_value(content, Width::W32), 0x1234_5678);
        assert_eq!(decode_value(content, Width::W16), 0x5678);

        assert!(matches!(open_envelope(&[], 4), Err(Error::Timeout)));
        assert!(matches!(open_envelope(&frame[.. 6], 4), Err(Error::Framing {expected: 8, received: 6})));
        let mut corrupted = frame.clone();
        corrupted[3] ^= 0x10;
        assert!(matches!(open_envelope(&corrupted, 4), Err(Error::Integrity)));
        let mut mislength = frame.clone();
        mislength[0] = 3;
        assert!(matches!(open_envelope(&mislength, 4), Err(Error::Framing {..})));
    }
}
