/// implement packbytes traits for a bilge bitfield, the bitfield must have a native integer size
#[macro_export]
macro_rules! pack_bilge {
    ($t:ty, $int:ty) => {

        impl packbytes::ToBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$int>()];

            fn to_le_bytes(self) -> Self::Bytes {
                <$int>::from(self).to_le_bytes()
            }
            fn to_be_bytes(self) -> Self::Bytes {
                <$int>::from(self).to_be_bytes()
            }
        }
        impl packbytes::FromBytes for $t {
            type Bytes = [u8; core::mem::size_of::<$int>()];

            fn from_le_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$int>::from_le_bytes(bytes))
            }
            fn from_be_bytes(bytes: Self::Bytes) -> Self {
                <$t>::from(<$int>::from_be_bytes(bytes))
            }
        }
    };
}


/// hexadecimal literal with as many digits as needed for `bits`
pub fn hex(value: u32, bits: u32) -> String {
    format!("{:#0width$X}", value, width = 2 + bits.div_ceil(4) as usize)
}

/// binary literal with exactly `bits` digits
pub fn bin(value: u32, bits: u32) -> String {
    format!("{:#0width$b}", value, width = 2 + bits.max(1) as usize)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(hex(0x4002_1000, 32), "0x40021000");
        assert_eq!(hex(0xab, 32), "0x000000AB");
        assert_eq!(hex(0xab, 8), "0xAB");
        assert_eq!(bin(0b10, 4), "0b0010");
        assert_eq!(bin(0, 0), "0b0");
    }
}
