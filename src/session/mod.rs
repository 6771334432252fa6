/*!
    register access to a remote microcontroller in `std` environment.

    The central resource is the [Session] struct which owns the link to the device and performs accesses one at a time: every call sends its request and, for reads, waits for the response before returning. There is never more than one command in flight, as the protocol carries no request identifier.

    - for typed access to registers and fields, use [Session::read], [Session::write_field] and friends
    - for raw access to addresses with arbitrary masks, use [Session::read_masked] and [Session::write_masked]
    - to capture the accesses made and compile them to C, open a [Recording] with [Session::record]

    Wire failures are returned as errors by the failing call only, the session remains usable. A failed exchange leaves frame alignment uncertain, so reads always clear the input buffer before sending their request, and [Session::resync] is available to realign.
*/

/// link abstraction and framing of requests and responses, with synchronization budget
mod transport;
/// convenient methods to read/write registers and fields
mod accessing;
/// in-process device for use without hardware
mod simulator;

pub use transport::{Link, Stream, Transport};
pub use accessing::Placement;
pub use simulator::Simulator;

use core::ops::{Deref, DerefMut};
use std::time::Duration;
use log::*;

use crate::{
    Error,
    command::BUDGET,
    recorder::{Recorder, Program, AccessEvent},
    };


/// session settings
#[derive(Clone, Debug)]
pub struct Config {
    /// uart baud rate
    pub rate: u32,
    /// maximum wait for a response
    pub timeout: Duration,
    /// bytes sent before a resynchronization is forced
    pub budget: usize,
    /// number of times a failed read is attempted again, after clearing and resynchronizing
    pub retries: u32,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            rate: 1_000_000,
            timeout: Duration::from_secs(1),
            budget: BUDGET,
            retries: 0,
        }
    }
}
impl Config {
    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = budget;
        self
    }
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
}


/// register access session on one link
pub struct Session<L> {
    transport: Transport<L>,
    config: Config,
    /// trace of the open recording, if any
    trace: Option<Recorder>,
}

impl<L: Link> Session<L> {
    /// start a session on an already opened link
    pub fn new(link: L, config: Config) -> Self {
        Self {
            transport: Transport::new(link, &config),
            config,
            trace: None,
        }
    }
    pub fn config(&self) -> &Config  {&self.config}
    pub fn link(&self) -> &L  {self.transport.link()}
    pub fn link_mut(&mut self) -> &mut L  {self.transport.link_mut()}
    pub fn transport(&mut self) -> &mut Transport<L>  {&mut self.transport}
    /// end the session, giving back the link
    pub fn close(self) -> L {
        self.transport.into_link()
    }

    /// realign frames with the device
    pub async fn resync(&mut self) -> Result<(), Error> {
        self.transport.resync().await
    }
    /// drop received bytes not read yet
    pub async fn clear(&mut self) -> Result<(), Error> {
        self.transport.clear().await
    }

    /**
        start recording accesses made through this session

        only one recording can be open at a time, the recording ends when the returned guard is finished or dropped
    */
    pub fn record(&mut self) -> Result<Recording<'_, L>, Error> {
        if self.trace.is_some()
            {return Err(Error::Recording)}
        debug!("start recording");
        self.trace = Some(Recorder::new());
        Ok(Recording {session: self})
    }
    /// prevent merging of recorded writes across this point
    pub fn barrier(&mut self) {
        if let Some(trace) = &mut self.trace {
            trace.barrier();
        }
    }
}

#[cfg(feature = "serial")]
impl Session<serial2_tokio::SerialPort> {
    /// open a serial port and start a session on it, failing to open is fatal
    pub fn open(path: impl AsRef<std::path::Path>, config: Config) -> Result<Self, Error> {
        use serial2_tokio::{SerialPort, CharSize, StopBits, Parity};

        let rate = config.rate;
        let port = SerialPort::open(path.as_ref(), move |mut settings: serial2_tokio::Settings| {
                settings.set_raw();
                settings.set_baud_rate(rate)?;
                settings.set_char_size(CharSize::Bits8);
                settings.set_stop_bits(StopBits::One);
                settings.set_parity(Parity::None);
                Ok(settings)
                })?;
        info!("opened {} at {} bauds", path.as_ref().display(), rate);
        Ok(Self::new(port, config))
    }
}


/**
    open recording on a [Session]

    accesses are made through this guard, which dereferences to the session. [Recording::finish] compiles the recorded trace, dropping the guard discards it.
*/
pub struct Recording<'s, L> {
    session: &'s mut Session<L>,
}
impl<L> Recording<'_, L> {
    /// events recorded so far
    pub fn events(&self) -> &[AccessEvent] {
        self.session.trace.as_ref()
            .map(|trace| trace.events())
            .unwrap_or_default()
    }
    /// close the recording and compile its trace
    pub fn finish(self) -> Result<Program, Error> {
        let trace = self.session.trace.take().unwrap_or_default();
        debug!("finish recording of {} events", trace.events().len());
        trace.compile()
    }
}
impl<L> Deref for Recording<'_, L> {
    type Target = Session<L>;
    fn deref(&self) -> &Self::Target {
        self.session
    }
}
impl<L> DerefMut for Recording<'_, L> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session
    }
}
impl<L> Drop for Recording<'_, L> {
    fn drop(&mut self) {
        if self.session.trace.take().is_some() {
            debug!("recording discarded");
        }
    }
}
