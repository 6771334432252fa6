/*!
    recording of register accesses and compilation into plain C

    A [Recorder] captures the logical accesses made during a sequence of operations. [Recorder::compile] then turns that trace into a [Program] of memory operations reproducing the same effect on the device without any communication:

    - consecutive 32 bit writes to the same register are merged into one instruction, each written bit keeps its last value
    - each merged write is reduced to its cheapest idiom (store, bit set, bit clear, or, and, load-modify-store)
    - reads are kept as volatile loads, for their side effects
    - waits become busy loops on the awaited field

    ```
    use uartreg::{recorder::Recorder, registers::Width};

    let mut recorder = Recorder::new();
    recorder.write(0x4002_1018, Width::W32, 0x0000_ffff, 0x1234, "APB2ENR low");
    recorder.write(0x4002_1018, Width::W32, 0xffff_0000, 0x5678_0000, "APB2ENR high");
    let program = recorder.compile().unwrap();
    assert_eq!(program.instructions().count(), 1);
    ```
*/

use core::fmt;
use log::*;

use crate::{
    Error,
    mask::{self, Idiom},
    registers::Width,
    utils::hex,
    };


/// logical access captured in a trace
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessEvent {
    Read {address: u32, width: Width, label: String},
    /// `value` is positioned in the register, only bits in `mask` are meaningful for 32 bit writes
    Write {address: u32, width: Width, mask: u32, value: u32, label: String},
    /// start polling a field, reads until [AccessEvent::WaitEnd] are not recorded
    WaitBegin,
    /// polled field reached the right-aligned `value`
    WaitEnd {address: u32, mask: u32, value: u32, label: String},
    /// nothing is merged across a barrier
    Barrier,
}

/// trace of accesses in chronological order
#[derive(Clone, Debug, Default)]
pub struct Recorder {
    events: Vec<AccessEvent>,
    waiting: bool,
}
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }
    /// events recorded so far
    pub fn events(&self) -> &[AccessEvent] {
        &self.events
    }
    /// true between [Self::wait_begin] and [Self::wait_end]
    pub fn waiting(&self) -> bool {
        self.waiting
    }

    pub fn read(&mut self, address: u32, width: Width, label: impl Into<String>) {
        if self.waiting
            {return}
        self.events.push(AccessEvent::Read {address, width, label: label.into()});
    }
    pub fn write(&mut self, address: u32, width: Width, mask: u32, value: u32, label: impl Into<String>) {
        self.events.push(AccessEvent::Write {address, width, mask, value, label: label.into()});
    }
    pub fn wait_begin(&mut self) {
        self.waiting = true;
        self.events.push(AccessEvent::WaitBegin);
    }
    pub fn wait_end(&mut self, address: u32, mask: u32, value: u32, label: impl Into<String>) {
        self.waiting = false;
        self.events.push(AccessEvent::WaitEnd {address, mask, value, label: label.into()});
    }
    /// close a wait that never reached its value, forgetting its opening
    pub fn wait_abort(&mut self) {
        if ! self.waiting
            {return}
        self.waiting = false;
        if let Some(start) = self.events.iter().rposition(|event| *event == AccessEvent::WaitBegin) {
            self.events.remove(start);
        }
    }
    pub fn barrier(&mut self) {
        self.events.push(AccessEvent::Barrier);
    }

    /// compile the trace, fails if a wait bracket is left open
    pub fn compile(&self) -> Result<Program, Error> {
        let mut compiler = Compiler::default();
        for event in &self.events {
            compiler.process(event)?;
        }
        compiler.finish()
    }
}


/// name of the pointer shared by idioms needing a register reference
const POINTER: &str = "reg";

/// one C statement of a compiled program
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    /// plain store of a whole register
    Store {address: u32, width: Width, value: u32},
    SetBit {address: u32, bit: u8},
    ClearBit {address: u32, bit: u8},
    SetMask {address: u32, mask: u32},
    ClearMask {address: u32, mask: u32},
    /// point the shared pointer to a register, `declare` is only set for its first use
    Bind {address: u32, declare: bool},
    /// replace the bits of mask in the bound register
    Modify {mask: u32, value: u32},
    /// volatile read whose result is discarded
    Load {address: u32, width: Width},
    /// busy loop until the bound register's masked bits equal `expected`
    Poll {mask: u32, expected: u32},
}
impl Instruction {
    /// register directly addressed by this instruction
    pub fn address(&self) -> Option<u32> {
        match *self {
            Self::Store {address, ..}
            | Self::SetBit {address, ..}
            | Self::ClearBit {address, ..}
            | Self::SetMask {address, ..}
            | Self::ClearMask {address, ..}
            | Self::Bind {address, ..}
            | Self::Load {address, ..}
                => Some(address),
            Self::Modify {..} | Self::Poll {..} => None,
        }
    }
}
impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let register = |address: u32, width: Width|
            format!("*(volatile {}*){}", width.ctype(), hex(address, 32));
        match *self {
            Self::Store {address, width, value} =>
                write!(f, "{} = {};", register(address, width), hex(value, width.bits())),
            Self::SetBit {address, bit} =>
                write!(f, "{} |= 1u << {};", register(address, Width::W32), bit),
            Self::ClearBit {address, bit} =>
                write!(f, "{} &= ~(1u << {});", register(address, Width::W32), bit),
            Self::SetMask {address, mask} =>
                write!(f, "{} |= {};", register(address, Width::W32), hex(mask, 32)),
            Self::ClearMask {address, mask} =>
                write!(f, "{} &= ~{};", register(address, Width::W32), hex(mask, 32)),
            Self::Bind {address, declare} => {
                if declare
                    {write!(f, "volatile uint32_t* ")?}
                write!(f, "{} = (volatile uint32_t*){};", POINTER, hex(address, 32))
            },
            Self::Modify {mask, value} =>
                write!(f, "*{p} = (*{p} & ~{}) | {};", hex(mask, 32), hex(value, 32), p=POINTER),
            Self::Load {address, width} =>
                write!(f, "(void) {};", register(address, width)),
            Self::Poll {mask, expected} =>
                write!(f, "while ((*{} & {}) != {});", POINTER, hex(mask, 32), hex(expected, 32)),
        }
    }
}

/// line of a compiled program, an instruction and or a comment
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub instruction: Option<Instruction>,
    pub label: Option<String>,
}

/**
    compiled sequence of memory operations

    its [Display] renders C statements, with labels as comments aligned in one column
*/
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    pub lines: Vec<Line>,
}
impl Program {
    /// instructions in execution order, without comment lines
    pub fn instructions(&self) -> impl Iterator<Item=&Instruction> {
        self.lines.iter().filter_map(|line| line.instruction.as_ref())
    }
}
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code: Vec<String> = self.lines.iter()
            .map(|line|  line.instruction.map(|i| i.to_string()).unwrap_or_default())
            .collect();
        let column = self.lines.iter().zip(&code)
            .filter(|(line, _)|  line.label.is_some())
            .map(|(_, code)|  code.len())
            .max()
            .unwrap_or(0);
        for (line, code) in self.lines.iter().zip(&code) {
            match &line.label {
                Some(label) => writeln!(f, "{:<column$} // {}", code, label)?,
                None => writeln!(f, "{}", code)?,
            }
        }
        Ok(())
    }
}


/// consecutive 32 bit writes to one register, not emitted yet
struct Accumulator {
    address: u32,
    mask: u32,
    value: u32,
    labels: Vec<String>,
}

#[derive(Default)]
struct Compiler {
    lines: Vec<Line>,
    pending: Option<Accumulator>,
    /// the shared pointer has already been declared
    declared: bool,
    waiting: bool,
}
impl Compiler {
    fn process(&mut self, event: &AccessEvent) -> Result<(), Error> {
        match event {
            &AccessEvent::Write {address, width: Width::W32, mask, value, ref label} => {
                if let Some(pending) = self.pending.as_mut().filter(|p| p.address == address) {
                    pending.value = (pending.value & !mask) | (value & mask);
                    pending.mask |= mask;
                    pending.labels.push(label.clone());
                    return Ok(())
                }
                self.flush();
                self.pending = Some(Accumulator {
                    address,
                    mask,
                    value: value & mask,
                    labels: vec![label.clone()],
                    });
            },
            &AccessEvent::Write {address, width, value, ref label, ..} => {
                self.flush();
                self.emit(Instruction::Store {address, width, value: value & width.mask()}, Some(label.clone()));
            },
            &AccessEvent::Read {address, width, ref label} => {
                self.flush();
                self.emit(Instruction::Load {address, width}, Some(label.clone()));
            },
            AccessEvent::WaitBegin => {
                self.flush();
                if self.waiting
                    {return Err(Error::DanglingWait)}
                self.waiting = true;
            },
            &AccessEvent::WaitEnd {address, mask, value, ref label} => {
                self.flush();
                if ! self.waiting
                    {return Err(Error::DanglingWait)}
                self.waiting = false;
                self.bind(address);
                self.emit(Instruction::Poll {mask, expected: mask::pack(value, mask)}, Some(label.clone()));
            },
            AccessEvent::Barrier => self.flush(),
        }
        Ok(())
    }
    fn finish(mut self) -> Result<Program, Error> {
        self.flush();
        if self.waiting {
            warn!("recording ended while waiting");
            return Err(Error::DanglingWait);
        }
        Ok(Program {lines: self.lines})
    }

    /// emit the pending merged write, if any
    fn flush(&mut self) {
        let Some(pending) = self.pending.take()
            else {return};
        let address = pending.address;
        let instruction = match mask::classify(pending.mask, pending.value) {
            Idiom::WriteOnly => Instruction::Store {address, width: Width::W32, value: pending.value},
            Idiom::SingleSet(bit) => Instruction::SetBit {address, bit},
            Idiom::SingleClear(bit) => Instruction::ClearBit {address, bit},
            Idiom::SetOnly => Instruction::SetMask {address, mask: pending.mask},
            Idiom::ClearOnly => Instruction::ClearMask {address, mask: pending.mask},
            Idiom::FullModify {mask, value} => {
                self.bind(address);
                Instruction::Modify {mask, value}
            },
        };
        let mut labels = pending.labels.into_iter();
        self.emit(instruction, labels.next());
        // further merged writes are only kept for traceability
        self.lines.extend(labels.map(|label|  Line {instruction: None, label: Some(label)}));
    }
    fn bind(&mut self, address: u32) {
        let declare = ! self.declared;
        self.declared = true;
        self.emit(Instruction::Bind {address, declare}, None);
    }
    fn emit(&mut self, instruction: Instruction, label: Option<String>) {
        debug!("emit {}", instruction);
        self.lines.push(Line {instruction: Some(instruction), label});
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const A: u32 = 0x4001_0000;
    const B: u32 = 0x4002_1000;

    #[test]
    fn coalesce_consecutive_writes() {
        let mut recorder = Recorder::new();
        recorder.write(A, Width::W32, 0x0000_ffff, 0x1234, "low");
        recorder.write(A, Width::W32, 0xffff_0000, 0x5678_0000, "high");
        let program = recorder.compile().unwrap();

        assert_eq!(program.lines, [
            Line {
                instruction: Some(Instruction::Store {address: A, width: Width::W32, value: 0x5678_1234}),
                label: Some("low".into()),
            },
            Line {instruction: None, label: Some("high".into())},
        ]);
    }

    #[test]
    fn last_write_wins() {
        let mut recorder = Recorder::new();
        recorder.write(A, Width::W32, 0b0011, 0b0011, "first");
        recorder.write(A, Width::W32, 0b0110, 0b0000, "second");
        let program = recorder.compile().unwrap();
        let instructions: Vec<_> = program.instructions().copied().collect();
        assert_eq!(instructions, [
            Instruction::Bind {address: A, declare: true},
            Instruction::Modify {mask: 0b0111, value: 0b0001},
        ]);
        assert_eq!(program.lines.len(), 3);
    }

    #[test]
    fn interleaved_accesses_split_writes() {
        let mut recorder = Recorder::new();
        recorder.write(A, Width::W32, 0xff, 0x12, "first");
        recorder.read(B, Width::W32, "other");
        recorder.write(A, Width::W32, 0xff00, 0x3400, "second");
        let program = recorder.compile().unwrap();
        let touching = program.instructions().filter(|i| i.address() == Some(A)).count();
        assert!(touching >= 2);
        assert_eq!(program.instructions().nth(2), Some(&Instruction::Load {address: B, width: Width::W32}));
    }

    #[test]
    fn barrier_splits_writes() {
        let mut recorder = Recorder::new();
        recorder.write(A, Width::W32, 1 << 4, 1 << 4, "set");
        recorder.barrier();
        recorder.write(A, Width::W32, 1 << 5, 0, "clear");
        let instructions: Vec<_> = recorder.compile().unwrap().instructions().copied().collect();
        assert_eq!(instructions, [
            Instruction::SetBit {address: A, bit: 4},
            Instruction::ClearBit {address: A, bit: 5},
        ]);
    }

    #[test]
    fn narrow_writes_are_plain_stores() {
        let mut recorder = Recorder::new();
        recorder.write(A, Width::W32, 0xf, 0xf, "word");
        recorder.write(A, Width::W8, 0x1, 0xab, "byte");
        recorder.write(A, Width::W16, 0x1, 0xabcd, "half");
        let instructions: Vec<_> = recorder.compile().unwrap().instructions().copied().collect();
        assert_eq!(instructions, [
            Instruction::SetMask {address: A, mask: 0xf},
            Instruction::Store {address: A, width: Width::W8, value: 0xab},
            Instruction::Store {address: A, width: Width::W16, value: 0xabcd},
        ]);
    }

    #[test]
    fn wait_declares_pointer_once() {
        let mut recorder = Recorder::new();
        recorder.wait_begin();
        // polling reads are not part of the trace
        recorder.read(B, Width::W32, "polling");
        recorder.wait_end(B, 0x0000_0300, 0b11, "ready");
        recorder.write(A, Width::W32, 0b11, 0b10, "mode");
        let program = recorder.compile().unwrap();
        let instructions: Vec<_> = program.instructions().copied().collect();
        assert_eq!(instructions, [
            Instruction::Bind {address: B, declare: true},
            Instruction::Poll {mask: 0x0000_0300, expected: 0x0000_0300},
            Instruction::Bind {address: A, declare: false},
            Instruction::Modify {mask: 0b11, value: 0b10},
        ]);
        let text = program.to_string();
        assert_eq!(text.matches("volatile uint32_t* reg").count(), 1);
        assert!(text.contains("while ((*reg & 0x00000300) != 0x00000300);"));
        assert!(text.contains("*reg = (*reg & ~0x00000003) | 0x00000002;"));
    }

    #[test]
    fn dangling_wait() {
        let mut recorder = Recorder::new();
        recorder.write(A, Width::W32, 1, 1, "enable");
        recorder.wait_begin();
        assert!(matches!(recorder.compile(), Err(Error::DanglingWait)));

        let mut recorder = Recorder::new();
        recorder.wait_end(A, 1, 1, "ready");
        assert!(matches!(recorder.compile(), Err(Error::DanglingWait)));
    }

    #[test]
    fn aborted_wait_is_forgotten() {
        let mut recorder = Recorder::new();
        recorder.write(A, Width::W32, 1, 1, "enable");
        recorder.wait_begin();
        recorder.read(B, Width::W32, "polling");
        recorder.wait_abort();
        recorder.read(B, Width::W32, "status");
        assert!(! recorder.waiting());
        assert_eq!(recorder.events(), [
            AccessEvent::Write {address: A, width: Width::W32, mask: 1, value: 1, label: "enable".into()},
            AccessEvent::Read {address: B, width: Width::W32, label: "status".into()},
        ]);
        // nothing to abort outside of a wait
        recorder.wait_abort();
        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.compile().unwrap().instructions().count(), 2);
    }

    #[test]
    fn rendering() {
        let mut recorder = Recorder::new();
        recorder.write(B, Width::W32, 1, 1, "RCC.CR.HSION = 0b1");
        recorder.write(B, Width::W32, 1 << 16, 1 << 16, "RCC.CR.HSEON = 0b1");
        recorder.read(A, Width::W16, "GPIOA.IDR");
        recorder.write(A, Width::W32, u32::MAX, 0xab, "GPIOA.ODR = 0x000000AB");
        let text = recorder.compile().unwrap().to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("*(volatile uint32_t*)0x40021000 |= 0x00010001;"));
        assert!(lines[1].trim_start().starts_with("// RCC.CR.HSEON"));
        assert!(lines[2].starts_with("(void) *(volatile uint16_t*)0x40010000;"));
        assert!(lines[3].starts_with("*(volatile uint32_t*)0x40010000 = 0x000000AB;"));
        // comments are aligned in one column
        let columns: Vec<usize> = lines.iter().map(|line| line.find("//").unwrap()).collect();
        assert!(columns.iter().all(|&c| c == columns[0]));
    }
}
