//! Test utilities shared across the workspace
//!
//! Provides canned descriptors and helper functions for the crate test
//! suites.

use std::future::Future;
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a mock USB device descriptor (18 bytes, USB 2.0, class at
/// interface level)
pub fn create_mock_device_descriptor() -> Vec<u8> {
    vec![
        0x12, // bLength
        0x01, // bDescriptorType (Device)
        0x00, 0x02, // bcdUSB (2.00)
        0x00, // bDeviceClass
        0x00, // bDeviceSubClass
        0x00, // bDeviceProtocol
        0x40, // bMaxPacketSize0 (64 bytes)
        0x34, 0x12, // idVendor (0x1234)
        0x78, 0x56, // idProduct (0x5678)
        0x00, 0x01, // bcdDevice (1.00)
        0x01, // iManufacturer
        0x02, // iProduct
        0x03, // iSerialNumber
        0x01, // bNumConfigurations
    ]
}

/// Create a mock device descriptor with explicit class/subclass/protocol
pub fn create_mock_device_descriptor_with_class(
    class: u8,
    subclass: u8,
    protocol: u8,
) -> Vec<u8> {
    let mut desc = create_mock_device_descriptor();
    desc[4] = class;
    desc[5] = subclass;
    desc[6] = protocol;
    desc
}

/// Create a mock USB configuration descriptor
///
/// Returns a minimal configuration with one vendor-specific interface and
/// one bulk IN endpoint (wTotalLength = 25).
pub fn create_mock_config_descriptor() -> Vec<u8> {
    vec![
        // Configuration descriptor
        0x09, // bLength
        0x02, // bDescriptorType (Configuration)
        0x19, 0x00, // wTotalLength (25 bytes)
        0x01, // bNumInterfaces
        0x01, // bConfigurationValue
        0x00, // iConfiguration
        0x80, // bmAttributes (Bus-powered)
        0x32, // bMaxPower (100mA)
        // Interface descriptor
        0x09, // bLength
        0x04, // bDescriptorType (Interface)
        0x00, // bInterfaceNumber
        0x00, // bAlternateSetting
        0x01, // bNumEndpoints
        0xFF, // bInterfaceClass (Vendor-specific)
        0x00, // bInterfaceSubClass
        0x00, // bInterfaceProtocol
        0x00, // iInterface
        // Endpoint descriptor
        0x07, // bLength
        0x05, // bDescriptorType (Endpoint)
        0x81, // bEndpointAddress (EP1 IN)
        0x02, // bmAttributes (Bulk)
        0x00, 0x02, // wMaxPacketSize (512 bytes)
        0x00, // bInterval
    ]
}

/// Create a mock configuration descriptor whose first interface carries
/// mass-storage class codes (08/06/50)
pub fn create_mock_storage_config_descriptor() -> Vec<u8> {
    let mut desc = create_mock_config_descriptor();
    desc[14] = 0x08; // bInterfaceClass
    desc[15] = 0x06; // bInterfaceSubClass
    desc[16] = 0x50; // bInterfaceProtocol
    desc
}

/// Create mock bulk transfer data of specified size
pub fn create_mock_bulk_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
