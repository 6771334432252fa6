/*!
    register metadata as consumed by the session and the recorder

    the actual catalog of a microcontroller (peripherals, addresses, fields, reset values) is pure data provided from outside, this module only defines its shape. Everything here is immutable and cheap to copy, so catalogs are typically declared as constants:

    ```
    use uartreg::registers::{Register, Field, Width};

    const ODR: Register = Register::new("GPIOA", "ODR", 0x4800_0014, Width::W32, 0, "output data register");
    const OD3: Field = Field::new(&ODR, "OD3", 1 << 3, "port output data bit 3");
    assert_eq!(OD3.bits(), 1);
    ```
*/

use crate::mask;


/// size of a memory access
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Width {
    W8,
    W16,
    W32,
}
impl Width {
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
        }
    }
    /// number of bytes transfered by an access of this width
    pub const fn bytes(self) -> usize {
        self.bits() as usize / 8
    }
    /// mask covering all bits of this width
    pub const fn mask(self) -> u32 {
        u32::MAX >> (32 - self.bits())
    }
    /// C type of an access of this width
    pub const fn ctype(self) -> &'static str {
        match self {
            Self::W8 => "uint8_t",
            Self::W16 => "uint16_t",
            Self::W32 => "uint32_t",
        }
    }
}


/// memory mapped register of the remote microcontroller
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Register {
    /// name of the peripheral owning this register
    pub peripheral: &'static str,
    pub name: &'static str,
    pub address: u32,
    pub width: Width,
    /// value after hardware reset
    pub reset: u32,
    pub description: &'static str,
}
impl Register {
    pub const fn new(
        peripheral: &'static str,
        name: &'static str,
        address: u32,
        width: Width,
        reset: u32,
        description: &'static str,
    ) -> Self {
        Self {peripheral, name, address, width, reset, description}
    }
    /// all bits of this register
    pub const fn mask(&self) -> u32 {
        self.width.mask()
    }
    /// dotted name including peripheral, as used in labels
    pub fn path(&self) -> String {
        format!("{}.{}", self.peripheral, self.name)
    }
}


/// subset of bits in a register, accessed as a right-aligned value
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Field<'r> {
    pub register: &'r Register,
    pub name: &'static str,
    /// bits of the register belonging to this field, not necessarily contiguous
    pub mask: u32,
    pub description: &'static str,
}
impl<'r> Field<'r> {
    /// panics if `mask` has bits beyond the register width, which fails the build for a constant field
    pub const fn new(register: &'r Register, name: &'static str, mask: u32, description: &'static str) -> Self {
        assert!(mask & !register.width.mask() == 0, "field mask exceeds its register width");
        Self {register, name, mask, description}
    }
    /// number of bits in the field
    pub const fn bits(&self) -> u32 {
        self.mask.count_ones()
    }
    /// right-aligned value of this field after hardware reset
    pub fn reset(&self) -> u32 {
        mask::unpack(self.register.reset, self.mask)
    }
    /// dotted name including peripheral and register, as used in labels
    pub fn path(&self) -> String {
        format!("{}.{}", self.register.path(), self.name)
    }
}


/**
    read-only lookup in a catalog of registers

    catalogs are loaded once, before any access, and never modified by this crate
*/
pub trait Catalog {
    fn register(&self, peripheral: &str, register: &str) -> Option<&Register>;
    fn field(&self, peripheral: &str, register: &str, field: &str) -> Option<Field<'_>>;
}

/// a flat list of registers and fields is the simplest catalog
impl Catalog for (&[Register], &[Field<'_>]) {
    fn register(&self, peripheral: &str, register: &str) -> Option<&Register> {
        self.0.iter()
            .find(|r|  r.peripheral == peripheral && r.name == register)
    }
    fn field(&self, peripheral: &str, register: &str, field: &str) -> Option<Field<'_>> {
        self.1.iter()
            .find(|f|  f.register.peripheral == peripheral && f.register.name == register && f.name == field)
            .copied()
    }
}
