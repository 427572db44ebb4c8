//! smoltcp Device adapter for FrameDriver.
//!
//! Bridges a raw Ethernet frame driver to smoltcp's Device trait.
//! Uses fixed-size buffers, no heap allocation in the packet path.

use smoltcp::phy::{Device, DeviceCapabilities, Medium};
use smoltcp::time::Instant;

/// Largest Ethernet frame handled, including the header.
pub const MAX_FRAME: usize = 2048;

/// Raw Ethernet frame I/O for one virtual interface.
pub trait FrameDriver {
    fn mac_address(&self) -> [u8; 6];

    /// Copy the next received frame into `buf`, returning its length.
    fn receive(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Queue one frame for transmission. Fire-and-forget.
    fn transmit(&mut self, frame: &[u8]);

    fn can_transmit(&self) -> bool {
        true
    }
}

/// Adapter bridging a FrameDriver to smoltcp's Device trait.
pub struct FrameAdapter<D: FrameDriver> {
    driver: D,
    rx_buffer: [u8; MAX_FRAME],
    rx_len: usize,
    tx_count: u32,
    rx_count: u32,
}

impl<D: FrameDriver> FrameAdapter<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            rx_buffer: [0u8; MAX_FRAME],
            rx_len: 0,
            tx_count: 0,
            rx_count: 0,
        }
    }

    /// Pull one frame from the driver if none is buffered.
    pub fn poll_receive(&mut self) {
        if self.rx_len == 0 {
            if let Some(len) = self.driver.receive(&mut self.rx_buffer) {
                self.rx_len = len.min(MAX_FRAME);
                self.rx_count += 1;
            }
        }
    }

    pub fn mac_address(&self) -> [u8; 6] {
        self.driver.mac_address()
    }

    pub fn tx_count(&self) -> u32 {
        self.tx_count
    }

    pub fn rx_count(&self) -> u32 {
        self.rx_count
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

/// RX token: owns a copy of the frame.
pub struct RxToken {
    buffer: [u8; MAX_FRAME],
    len: usize,
}

impl smoltcp::phy::RxToken for RxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(&mut self.buffer[..self.len])
    }
}

/// TX token: writes straight through the driver.
pub struct TxToken<'a, D: FrameDriver> {
    driver: &'a mut D,
    tx_count: &'a mut u32,
}

impl<'a, D: FrameDriver> smoltcp::phy::TxToken for TxToken<'a, D> {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut buffer = [0u8; MAX_FRAME];
        let actual_len = len.min(MAX_FRAME);

        let result = f(&mut buffer[..actual_len]);
        self.driver.transmit(&buffer[..actual_len]);
        *self.tx_count += 1;

        result
    }
}

impl<D: FrameDriver> Device for FrameAdapter<D> {
    type RxToken<'b> = RxToken where Self: 'b;
    type TxToken<'b> = TxToken<'b, D> where Self: 'b;

    fn receive(&mut self, _timestamp: Instant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        self.poll_receive();
        if self.rx_len == 0 {
            return None;
        }

        let mut rx_buf = [0u8; MAX_FRAME];
        let len = self.rx_len;
        rx_buf[..len].copy_from_slice(&self.rx_buffer[..len]);
        self.rx_len = 0;

        Some((
            RxToken { buffer: rx_buf, len },
            TxToken {
                driver: &mut self.driver,
                tx_count: &mut self.tx_count,
            },
        ))
    }

    fn transmit(&mut self, _timestamp: Instant) -> Option<Self::TxToken<'_>> {
        if !self.driver.can_transmit() {
            return None;
        }
        Some(TxToken {
            driver: &mut self.driver,
            tx_count: &mut self.tx_count,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ethernet;
        caps.max_transmission_unit = 1514;
        caps.max_burst_size = Some(32);
        caps
    }
}
