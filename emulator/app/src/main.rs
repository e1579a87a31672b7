/*++

Licensed under the Apache-2.0 license.

File Name:

    main.rs

Abstract:

    File contains main entrypoint for the OpenTitan Emulator.

--*/

mod chardev;

use crate::chardev::{Console, SocketServer};
use clap::{arg, value_parser};
use ot_emu_bus::{Bus, CharPipe, Clock, RunControl, RunRequest};
use ot_emu_periph::otp_ctrl::OTP_DATA_SIZE;
use ot_emu_periph::{
    DevProxy, DevProxyArgs, JtagServer, OtRootBus, OtRootBusArgs, OtpCtrlArgs, OtpImage,
    SramCtrlArgs, TapController, TapCtrlArgs,
};
use std::io;
use std::path::PathBuf;
use std::process::exit;
use std::thread;
use std::time::Duration;

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|err| format!("invalid number {s:?}: {err}"))
}

fn read_file(what: &str, path: &PathBuf) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            log::error!("cannot read {what} {}: {err}", path.display());
            exit(-1);
        }
    }
}

fn main() -> io::Result<()> {
    let args = clap::Command::new("ot-emu")
        .about("OpenTitan device emulator")
        .arg(
            arg!(--rom <FILE> "Boot ROM image")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--"otp-image" <FILE> "OTP backend image")
                .required(false)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            arg!(--"jtag-port" <PORT> "TCP port of the JTAG bit-bang server")
                .required(false)
                .value_parser(value_parser!(u16)),
        )
        .arg(
            arg!(--"proxy-port" <PORT> "TCP port of the device proxy")
                .required(false)
                .value_parser(value_parser!(u16)),
        )
        .arg(
            arg!(--"spi-port" <PORT> "TCP port of the SPI device host link")
                .required(false)
                .value_parser(value_parser!(u16)),
        )
        .arg(
            arg!(--"sram-size" <BYTES> "Main SRAM size")
                .required(false)
                .value_parser(parse_u32),
        )
        .arg(
            arg!(--idcode <VALUE> "JTAG IDCODE")
                .required(false)
                .value_parser(parse_u32),
        )
        .arg(
            arg!(--"clock-step-ns" <NS> "Largest virtual time step")
                .required(false)
                .default_value("1000")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            arg!(--"entropy-seed" <SEED> "Seed of the entropy sources")
                .required(false)
                .value_parser(value_parser!(u64)),
        )
        .arg(arg!(--"start-stopped" "Hold the machine until the proxy resumes it").required(false))
        .arg(arg!(--"log-level" <FILTER> "Log filter, overrides RUST_LOG").required(false))
        .get_matches();

    let mut logger = env_logger::Builder::from_default_env();
    if let Some(filter) = args.get_one::<String>("log-level") {
        logger.parse_filters(filter);
    }
    logger.init();

    let otp = match args.get_one::<PathBuf>("otp-image") {
        Some(path) => match OtpImage::parse(&read_file("OTP image", path), OTP_DATA_SIZE) {
            Ok(image) => OtpCtrlArgs { image: Some(image) },
            Err(err) => {
                log::error!("{}: {err}", path.display());
                exit(-1);
            }
        },
        None => OtpCtrlArgs::default(),
    };
    let mut sram = SramCtrlArgs::default();
    if let Some(size) = args.get_one::<u32>("sram-size") {
        sram.size = *size as usize;
    }
    let mut tap_args = TapCtrlArgs::default();
    if let Some(idcode) = args.get_one::<u32>("idcode") {
        tap_args.idcode = *idcode;
    }
    let step_ns = args.get_one::<u64>("clock-step-ns").copied().unwrap_or(1000);

    let clock = Clock::new();
    let run = RunControl::new();
    let bus_args = OtRootBusArgs {
        rom: args
            .get_one::<PathBuf>("rom")
            .map(|path| read_file("ROM", path))
            .unwrap_or_default(),
        entropy_seed: args.get_one::<u64>("entropy-seed").copied(),
        otp,
        sram,
        ..Default::default()
    };
    let mut bus = match OtRootBus::new(&clock, bus_args, run.clone()) {
        Ok(bus) => bus,
        Err(err) => {
            log::error!("{err}");
            exit(-1);
        }
    };
    bus.ibex.set_dv_output(Box::new(Console));

    let mut jtag = match args.get_one::<u16>("jtag-port") {
        Some(port) => {
            let tap = match TapController::new(tap_args) {
                Ok(tap) => tap,
                Err(err) => {
                    log::error!("{err}");
                    exit(-1);
                }
            };
            let pipe = CharPipe::new();
            let server = SocketServer::bind("jtag", *port, pipe.clone())?;
            Some((server, JtagServer::new(tap, Box::new(pipe), run.clone())))
        }
        None => None,
    };

    let mut proxy = match args.get_one::<u16>("proxy-port") {
        Some(port) => {
            let pipe = CharPipe::new();
            let server = SocketServer::bind("proxy", *port, pipe.clone())?;
            let proxy_args = DevProxyArgs {
                start_stopped: args.contains_id("start-stopped"),
            };
            let mut proxy = DevProxy::new(proxy_args, Box::new(pipe), run.clone());
            bus.register_proxy(&mut proxy);
            Some((server, proxy))
        }
        None => None,
    };

    let mut spi = match args.get_one::<u16>("spi-port") {
        Some(port) => Some((
            SocketServer::bind("spi", *port, bus.spi_miso.clone())?,
            bus.spi.clone(),
        )),
        None => None,
    };

    log::info!("machine ready");
    loop {
        match run.take_request() {
            Some(RunRequest::Shutdown(code)) => {
                log::info!("shutdown requested, exit code {code}");
                exit(code);
            }
            Some(RunRequest::Reset) => {
                log::info!("system reset");
                bus.warm_reset();
            }
            None => {}
        }

        let mut traffic = 0;
        if let Some((server, jtag)) = jtag.as_mut() {
            traffic += server.service(jtag)?.bytes;
        }
        if let Some((server, proxy)) = proxy.as_mut() {
            let activity = server.service(proxy)?;
            if activity.disconnected {
                proxy.disconnect();
            }
            traffic += activity.bytes;
        }
        if let Some((server, spi)) = spi.as_mut() {
            traffic += server.service(spi)?.bytes;
        }

        if run.is_stopped() {
            thread::sleep(Duration::from_millis(1));
            continue;
        }
        let elapsed = clock.step(step_ns, &mut bus);
        if traffic == 0 && clock.next_action_time().is_none() {
            // nothing scheduled: let the host catch up
            thread::sleep(Duration::from_micros(100));
        } else if elapsed == 0 && traffic == 0 {
            thread::yield_now();
        }
    }
}
