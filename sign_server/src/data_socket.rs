//! Clip socket.
//!
//! Each TCP connection is one classification request. The peer sends length-delimited
//! bincode [`ProtoMsg`]s: an optional `ConnectReq`, a run of `FrameMsg`s and `EndOfStream`.
//! Frames are fed to the engine as they arrive; once it decides, the server answers with a
//! `Decision` and closes the connection, even if the peer is still sending.
use std::{future::pending, sync::Arc};

use anyhow::Result;
use bytes::Bytes;
use common::protocol::ProtoMsg;
use futures::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::{
    codec::{Framed, LengthDelimitedCodec},
    sync::CancellationToken,
};

use crate::{engine::Engine, source::ChannelSource};

/// Frames buffered between the socket and the engine.
const FRAME_QUEUE: usize = 8;

pub async fn spawn_data_socket(
    engine: Arc<Engine>,
    addr: &str,
) -> Result<JoinHandle<std::io::Result<()>>> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Clip socket listening on {}", listener.local_addr()?);

    Ok(serve_data_socket(engine, listener))
}

/// Accept clip connections on an already bound listener.
pub fn serve_data_socket(
    engine: Arc<Engine>,
    listener: TcpListener,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await?;
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                if let Err(e) = handle_incoming(socket, engine).await {
                    log::warn!("Clip connection failed: {:#}", e);
                }
            });
        }
    })
}

async fn handle_incoming(stream: TcpStream, engine: Arc<Engine>) -> Result<()> {
    let peer = stream.peer_addr()?;
    log::info!("{}: New connection", peer);

    let mut transport = Framed::new(stream, LengthDelimitedCodec::new());

    let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(FRAME_QUEUE);
    let mut frame_tx = Some(frame_tx);

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let time_budget = engine.config().time_budget;
    let engine_cancel = cancel.clone();
    let mut decision = tokio::task::spawn_blocking(move || {
        engine.classify_stream(ChannelSource::new(frame_rx), &engine_cancel)
    });

    let budget = async move {
        match time_budget {
            Some(budget) => tokio::time::sleep(budget).await,
            None => pending().await,
        }
    };
    tokio::pin!(budget);

    let mut name = String::from("unknown");

    let result = loop {
        tokio::select! {
            result = &mut decision => break result?,

            _ = &mut budget, if frame_tx.is_some() => {
                log::info!("{}: time budget of clip {} elapsed", peer, name);
                cancel.cancel();
                frame_tx = None;
            }

            msg = transport.next(), if frame_tx.is_some() => match msg {
                None => {
                    log::debug!("{}: peer closed the stream", peer);
                    frame_tx = None;
                }
                Some(Err(e)) => {
                    log::warn!("{}: read error {}", peer, e);
                    frame_tx = None;
                }
                Some(Ok(data)) => match ProtoMsg::deserialize(&data[..]) {
                    Ok(ProtoMsg::ConnectReq(clip)) => {
                        log::info!("{}: clip {}", peer, clip);
                        name = clip;
                    }
                    Ok(ProtoMsg::FrameMsg(frame_msg)) => {
                        let delivered = match frame_tx.as_ref() {
                            Some(tx) => tx.send(frame_msg.data).await.is_ok(),
                            None => false,
                        };
                        if !delivered {
                            log::debug!("{}: engine stopped consuming frames of {}", peer, frame_msg.id);
                            frame_tx = None;
                        }
                    }
                    Ok(ProtoMsg::EndOfStream) => {
                        frame_tx = None;
                    }
                    Ok(ProtoMsg::Decision(_)) => {
                        log::warn!("{}: ignoring decision message from client", peer);
                    }
                    Err(e) => {
                        log::warn!("{}: malformed message: {}", peer, e);
                    }
                },
            },
        }
    };

    log::info!("{}: clip {} decided {:?}", peer, name, result.labels);

    let reply = ProtoMsg::Decision(result).serialize()?;
    transport.send(Bytes::from(reply)).await?;

    Ok(())
}
