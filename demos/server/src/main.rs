//! Interactive Modbus server serving TCP or a serial port

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use mbserver::*;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    transport: Transport,
    /// log frame headers and the function codes of requests
    #[clap(short, long, value_parser, default_value_t = false)]
    decode: bool,
    /// number of registers and bits updated by the stdin commands
    #[clap(short, long, value_parser, default_value_t = 10)]
    count: usize,
}

#[derive(Subcommand)]
enum Transport {
    /// Listen for Modbus TCP connections
    Tcp {
        #[clap(short, long, value_parser, default_value = "127.0.0.1:502")]
        address: SocketAddr,
    },
    /// Serve Modbus RTU on a serial port
    Rtu {
        #[clap(short, long, value_parser)]
        path: String,
        #[clap(short, long, value_parser, default_value_t = 9600)]
        baud_rate: u32,
    },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Cli::parse();

    // initialize logging
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .init();

    let decode = if args.decode {
        DecodeLevel::new(
            AppDecodeLevel::DataHeaders,
            FrameDecodeLevel::Header,
            PhysDecodeLevel::Nothing,
        )
    } else {
        DecodeLevel::nothing()
    };

    let server = Server::with_settings(ServerSettings {
        decode,
        ..Default::default()
    });

    // if we ever drop this handle, the server will shutdown
    // along with all of its transports
    let handle = server.spawn();
    match args.transport {
        Transport::Tcp { address } => {
            let local = handle.listen_tcp(address).await?;
            tracing::info!("listening on {}", local);
        }
        Transport::Rtu { path, baud_rate } => {
            let settings = SerialSettings {
                baud_rate,
                ..Default::default()
            };
            let port = handle.listen_rtu(&path, settings)?;
            tracing::info!("serving {}", port);
        }
    }

    let count = args.count.min(u16::MAX as usize);
    let mut reader = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    loop {
        let line = match reader.next().await {
            Some(line) => line?,
            None => break,
        };
        match line.as_str() {
            "x" => break,
            "uc" => {
                handle
                    .transaction(move |memory| {
                        for coil in &mut memory.coils_mut()[..count] {
                            *coil = !*coil;
                        }
                    })
                    .await?
            }
            "udi" => {
                handle
                    .transaction(move |memory| {
                        for input in &mut memory.discrete_inputs_mut()[..count] {
                            *input = !*input;
                        }
                    })
                    .await?
            }
            "uhr" => {
                handle
                    .transaction(move |memory| {
                        for register in &mut memory.holding_registers_mut()[..count] {
                            *register = register.wrapping_add(1);
                        }
                    })
                    .await?
            }
            "uir" => {
                handle
                    .transaction(move |memory| {
                        for register in &mut memory.input_registers_mut()[..count] {
                            *register = register.wrapping_add(1);
                        }
                    })
                    .await?
            }
            _ => println!("unknown command"),
        }
    }

    handle.shutdown().await;
    Ok(())
}
