//! Linux TUN backend: device I/O through the `tun` crate, address/route/MTU
//! changes through `ip`(8) (spec §4.1). The `tun` crate's own configuration
//! surface only covers IPv4 address/netmask/mtu at creation time; everything
//! applied afterwards - IPv6 addresses, routes, MTU changes - goes through
//! the same tool the host's own network stack uses.

use crate::{TunDevice, TunError, TunOption};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{split, AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

/// The device is split into independent read/write halves (rather than kept
/// behind one shared lock) so a blocked `read()` - which waits indefinitely
/// for the host to send a packet - never starves a concurrent `write()`
/// (spec §8's two-peer-echo round trip needs writes to go through regardless
/// of how quiet the host side is).
pub struct LinuxTun {
    name: String,
    mtu: u16,
    reader: Mutex<Option<ReadHalf<tun::AsyncDevice>>>,
    writer: Mutex<Option<WriteHalf<tun::AsyncDevice>>>,
    up: AtomicBool,
}

impl LinuxTun {
    pub fn new(name: impl Into<String>, mtu: u16) -> Self {
        Self {
            name: name.into(),
            mtu,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            up: AtomicBool::new(false),
        }
    }

    async fn run_ip(&self, args: &[&str]) -> Result<(), TunError> {
        let output = tokio::process::Command::new("ip")
            .args(args)
            .output()
            .await?;
        if !output.status.success() {
            tracing::warn!(
                name = %self.name,
                args = ?args,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "ip command did not succeed, treating as no-op"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl TunDevice for LinuxTun {
    async fn up(&self) -> Result<(), TunError> {
        let mut config = tun::Configuration::default();
        config.name(&self.name).mtu(self.mtu as i32).up();
        config.platform(|p| {
            p.packet_information(false);
        });
        let dev = tun::create_as_async(&config)?;
        let (rh, wh) = split(dev);
        *self.reader.lock().await = Some(rh);
        *self.writer.lock().await = Some(wh);
        self.up.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn down(&self) -> Result<(), TunError> {
        self.up.store(false, Ordering::SeqCst);
        *self.reader.lock().await = None;
        *self.writer.lock().await = None;
        Ok(())
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, TunError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(TunError::Closed);
        }
        let mut guard = self.reader.lock().await;
        let rh = guard.as_mut().ok_or(TunError::Closed)?;
        rh.read(buf).await.map_err(Into::into)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize, TunError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(TunError::Closed);
        }
        let mut guard = self.writer.lock().await;
        let wh = guard.as_mut().ok_or(TunError::Closed)?;
        wh.write(buf).await.map_err(Into::into)
    }

    async fn apply(&self, options: &[TunOption]) -> Result<(), TunError> {
        for option in options {
            match option {
                TunOption::Address(IpAddr::V4(addr), prefix) => {
                    self.run_ip(&[
                        "addr",
                        "add",
                        &format!("{addr}/{prefix}"),
                        "dev",
                        &self.name,
                    ])
                    .await?;
                }
                TunOption::Address(IpAddr::V6(addr), prefix) => {
                    self.run_ip(&[
                        "-6",
                        "addr",
                        "add",
                        &format!("{addr}/{prefix}"),
                        "dev",
                        &self.name,
                    ])
                    .await?;
                }
                TunOption::Route(net) => {
                    self.run_ip(&["route", "add", &net.to_string(), "dev", &self.name])
                        .await?;
                }
                TunOption::RemoveRoute(net) => {
                    self.run_ip(&["route", "del", &net.to_string(), "dev", &self.name])
                        .await?;
                }
                TunOption::Mtu(mtu) => {
                    self.run_ip(&["link", "set", "dev", &self.name, "mtu", &mtu.to_string()])
                        .await?;
                }
            }
        }
        Ok(())
    }
}
