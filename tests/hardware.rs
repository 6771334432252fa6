//! accesses on a real device, the port is given by `UARTREG_PORT`
//!
//! run with `cargo test --test hardware -- --ignored`
#![cfg(feature = "serial")]

use std::time::Duration;
use serial_test::serial;

use uartreg::{
    registers::{Register, Field, Width},
    session::{Session, Config},
    };


fn test<T, F>(test: T)
where
    T: FnOnce(Session<serial2_tokio::SerialPort>) -> F,
    F: Future,
{
    let _ = env_logger::builder().is_test(true).try_init();
    let path = std::env::var("UARTREG_PORT").unwrap_or("/dev/ttyUSB0".into());
    tokio::runtime::Runtime::new()
    .expect("failed to create runtime")
    .block_on(async move {
        let session = Session::open(&path, Config::default().with_retries(2))
            .expect("failed to open session");
        tokio::time::timeout(Duration::from_secs(10), test(session))
            .await.expect("aborted test because took too long");
    });
}

// STM32F1 clock controller
const RCC_CR: Register = Register::new("RCC", "CR", 0x4002_1000, Width::W32, 0x0000_0083, "clock control");
const HSION: Field = Field::new(&RCC_CR, "HSION", 1 << 0, "internal clock enable");
const HSIRDY: Field = Field::new(&RCC_CR, "HSIRDY", 1 << 1, "internal clock ready");
const RCC_APB2ENR: Register = Register::new("RCC", "APB2ENR", 0x4002_1018, Width::W32, 0, "peripheral clock enable");
const IOPCEN: Field = Field::new(&RCC_APB2ENR, "IOPCEN", 1 << 4, "port C clock enable");


#[test]
#[ignore]
#[serial]
fn internal_clock_ready() {
    test(|mut session| async move {
        session.resync().await.expect("device not answering");
        session.write_field(&HSION, 1).await.unwrap();
        session.wait_until(&HSIRDY, 1, Duration::from_millis(100)).await.unwrap();
        assert_eq!(session.read_field(&HSION).await.unwrap(), 1);
    });
}

#[test]
#[ignore]
#[serial]
fn enable_round_trip() {
    test(|mut session| async move {
        let initial = session.read_field(&IOPCEN).await.unwrap();
        for value in [1, 0, 1] {
            session.write_field(&IOPCEN, value).await.unwrap();
            assert_eq!(session.read_field(&IOPCEN).await.unwrap(), value);
        }
        session.write_field(&IOPCEN, initial).await.unwrap();
    });
}

#[test]
#[ignore]
#[serial]
fn record_on_device() {
    test(|mut session| async move {
        let mut recording = session.record().unwrap();
        recording.write_field(&IOPCEN, 1).await.unwrap();
        recording.wait_until(&HSIRDY, 1, Duration::from_millis(100)).await.unwrap();
        let program = recording.finish().unwrap();
        assert_eq!(program.instructions().count(), 3);
        println!("{}", program);
    });
}
