//! Console and housekeeping task
//!
//! The serial console shares the loop with the housekeeping pass: every
//! received byte is echoed and assembled into a line, and at least once a
//! millisecond the supervisor runs its pass and may hand back a telemetry
//! record.

use cougar_drive::config::Config;
use cougar_drive::console::{Echo, LineBuffer};
use cougar_drive::{Reply, Supervisor};
use embassy_futures::select::{select, Either};
use embassy_stm32::usart::{BufferedUart, BufferedUartTx};
use embassy_time::{Duration, Ticker};
use embedded_io_async::{Read, Write};

use crate::eeprom::{FlashEeprom, HwCrc16, Iwdg};
use crate::fmt::*;
use crate::hardware::{StatusPins, UptimeClock};

pub type FirmwareSupervisor = Supervisor<'static, FlashEeprom, HwCrc16, Iwdg>;

/// Room for the full configuration listing
const REPLY_CAPACITY: usize = 1024;

#[embassy_executor::task]
pub async fn console_task(
    uart: BufferedUart<'static>,
    mut supervisor: FirmwareSupervisor,
    mut outputs: StatusPins,
) {
    let (mut tx, mut rx) = uart.split();
    let mut line = LineBuffer::new();
    let mut rx_buf = [0u8; 16];
    let mut ticker = Ticker::every(Duration::from_millis(1));

    info!("Console task started");
    send_reply(&mut tx, Reply::Banner, supervisor.config()).await;

    loop {
        let event = select(rx.read(&mut rx_buf), ticker.next()).await;

        match event {
            Either::First(Ok(n)) => {
                for &byte in &rx_buf[..n] {
                    match line.push(byte) {
                        Echo::Byte(echo) => send(&mut tx, &[echo]).await,
                        Echo::EndOfLine => {
                            send(&mut tx, b"\n\r").await;
                            if let Some(reply) = supervisor.handle_line(line.as_str(), &UptimeClock)
                            {
                                send_reply(&mut tx, reply, supervisor.config()).await;
                                if reply == Reply::Restart {
                                    restart(&mut tx).await;
                                }
                            }
                            line.clear();
                        }
                    }
                }
            }
            Either::First(Err(e)) => error!("Console RX error: {}", e),
            Either::Second(()) => {}
        }

        if let Some(record) = supervisor.poll(&mut outputs) {
            match record.to_line() {
                Ok(text) => send(&mut tx, text.as_bytes()).await,
                Err(_) => error!("Telemetry line overflow"),
            }
        }
    }
}

async fn send_reply(tx: &mut BufferedUartTx<'static>, reply: Reply, config: &Config) {
    let mut text: heapless::String<REPLY_CAPACITY> = heapless::String::new();
    if reply.write_to(config, &mut text).is_err() {
        error!("Reply truncated: {}", reply);
    }
    send(tx, text.as_bytes()).await;
}

async fn send(tx: &mut BufferedUartTx<'static>, bytes: &[u8]) {
    if bytes.is_empty() {
        return;
    }
    if let Err(e) = tx.write_all(bytes).await {
        error!("Console TX error: {}", e);
    }
}

async fn restart(tx: &mut BufferedUartTx<'static>) -> ! {
    let _ = tx.flush().await;
    info!("Resetting");
    cortex_m::peripheral::SCB::sys_reset()
}
