use std::{path::PathBuf, time::Duration};

use clap::Parser;
use common::protocol::{FrameMsg, ProtoMsg};
use env_logger::TimestampPrecision;
use futures::{sink::SinkExt, StreamExt};
use sign_sender::{clip::read_frames, Error};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the clip socket to connect to
    #[clap(long, default_value = "127.0.0.1:3001")]
    address: String,

    /// Clip name reported to the server
    #[clap(long, default_value = "clip")]
    name: String,

    /// Delay between frames in milliseconds, to mimic a live camera
    #[clap(long, default_value_t = 0)]
    frame_interval_ms: u64,

    /// MJPEG clip to stream
    file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let frames = read_frames(&args.file)?;
    log::info!("Streaming {} frames of {}", frames.len(), &args.name);

    let stream = TcpStream::connect(&args.address).await?;
    log::info!("Client connected to {}", &args.address);

    // Wrap stream in transport handler with length-delimited codec
    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    // Send init message
    let init_msg = bytes::Bytes::from(ProtoMsg::ConnectReq(args.name.clone()).serialize()?);
    transport.send(init_msg).await?;

    for frame in frames {
        let data = ProtoMsg::FrameMsg(FrameMsg::new(args.name.clone(), frame)).serialize()?;
        if let Err(e) = transport.send(bytes::Bytes::from(data)).await {
            // The server hangs up once it has decided
            log::debug!("Stopped sending: {}", e);
            break;
        }
        if args.frame_interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(args.frame_interval_ms)).await;
        }
    }
    transport
        .send(bytes::Bytes::from(ProtoMsg::EndOfStream.serialize()?))
        .await
        .ok();

    while let Some(reply) = transport.next().await {
        match ProtoMsg::deserialize(&reply?[..])? {
            ProtoMsg::Decision(decision) => {
                println!("{:?} after {} frames: {:?}", decision.reason, decision.frames_processed, decision.labels);
                return Ok(());
            }
            other => log::warn!("Unexpected message {:?}", other),
        }
    }

    log::error!("Server closed the connection without a decision");

    Ok(())
}
