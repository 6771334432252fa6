/*!
    mask algebra

    a mask selects an arbitrary subset of bits in a 32 bit register word. Values handled by the user are right-aligned: the i-th bit of a value corresponds to the i-th set bit of the mask, counting from the least significant.
*/

/// all bits of a 32 bit register
pub const FULL: u32 = u32::MAX;

/// positions of the set bits of `mask`, from low to high
pub fn positions(mask: u32) -> impl Iterator<Item=u8> {
    (0 .. 32u8).filter(move |&i|  mask & (1 << i) != 0)
}

/// spread the low bits of `value` on the set bits of `mask`, other bits are 0
pub fn pack(value: u32, mask: u32) -> u32 {
    positions(mask).enumerate()
        .filter(|&(j, _)|  value & (1 << j) != 0)
        .fold(0, |word, (_, i)|  word | (1 << i))
}

/// gather the bits of `word` selected by `mask` into a right-aligned value
pub fn unpack(word: u32, mask: u32) -> u32 {
    positions(mask).enumerate()
        .filter(|&(_, i)|  word & (1 << i) != 0)
        .fold(0, |value, (j, _)|  value | (1 << j))
}

/// canonical hardware idiom realizing a masked write
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Idiom {
    /// whole word is overwritten
    WriteOnly,
    /// one bit is set, nothing else changes
    SingleSet(u8),
    /// one bit is cleared, nothing else changes
    SingleClear(u8),
    /// all masked bits are set
    SetOnly,
    /// all masked bits are cleared
    ClearOnly,
    /// masked bits get a mix of ones and zeros, needs load-modify-store
    FullModify {mask: u32, value: u32},
}

/**
    classify a write of positioned `value` under `mask`

    the first matching idiom wins, in the order of [Idiom] variants
*/
pub fn classify(mask: u32, value: u32) -> Idiom {
    let set = mask & value;
    let clear = mask & !value;

    if mask == FULL
        {Idiom::WriteOnly}
    else if set.count_ones() == 1 && clear == 0
        {Idiom::SingleSet(set.trailing_zeros() as u8)}
    else if set == 0 && clear.count_ones() == 1
        {Idiom::SingleClear(clear.trailing_zeros() as u8)}
    else if set == mask
        {Idiom::SetOnly}
    else if set == 0
        {Idiom::ClearOnly}
    else
        {Idiom::FullModify {mask, value: set}}
}
