/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the OpenTitan Emulator Peripheral library.

--*/
mod alert_handler;
pub mod dev_proxy;
mod dma;
mod entropy;
mod gpio;
mod ibex_wrapper;
pub mod jtag;
mod mbx;
pub mod mubi;
pub mod otp_ctrl;
mod pinmux;
mod plic_ext;
mod root_bus;
mod shadow;
mod soc_proxy;
pub mod spi_device;
mod sram_ctrl;

pub use alert_handler::{local_alert, AlertHandler, AlertHandlerArgs, ClassState};
pub use dev_proxy::{DevProxy, DevProxyArgs, ProxyDevice, ProxyError, ProxyTarget};
pub use dma::{Dma, DmaArgs, DmaSpaces, DmaState};
pub use entropy::{EntropySource, RandomEntropy};
pub use gpio::{Gpio, GpioArgs};
pub use ibex_wrapper::{IbexWrapper, IbexWrapperArgs};
pub use jtag::{JtagServer, TapController, TapCtrlArgs, TapState};
pub use mbx::{Mailbox, MailboxArgs};
pub use otp_ctrl::{OtpCtrl, OtpCtrlArgs, OtpImage, OtpImageError, OtpInterface};
pub use pinmux::{Pinmux, PinmuxArgs};
pub use plic_ext::PlicExt;
pub use root_bus::{OtRootBus, OtRootBusArgs};
pub use shadow::{ShadowReg, ShadowWrite};
pub use soc_proxy::{SocProxy, SocProxyArgs};
pub use spi_device::{SpiDevice, SpiDeviceArgs};
pub use sram_ctrl::{SramCtrl, SramCtrlArgs};

use thiserror::Error;

/// Invalid device parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{device}: {reason}")]
    Invalid { device: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(device: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            device,
            reason: reason.into(),
        }
    }
}
