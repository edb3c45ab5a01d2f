//! TCP responder serving lost-packet replay from the bounded history.
//!
//! The connection is persistent: a receiver writes any number of
//! `{start, end}` requests and gets back, per request, a stream of
//! `u16` little-endian length-prefixed datagrams. I/O failures end the
//! connection; the receiver redials on its next request.

use crate::error::ExchangeError;
use crate::marketdata::history::PacketHistory;
use crate::wire::ReplayRequest;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

pub(crate) fn spawn(
    listener: TcpListener,
    history: Arc<PacketHistory>,
) -> Result<(), ExchangeError> {
    info!(addr = %listener.local_addr()?, "replay responder listening");
    thread::Builder::new()
        .name("md-replay-accept".to_string())
        .spawn(move || accept_loop(listener, history))?;
    Ok(())
}

fn accept_loop(listener: TcpListener, history: Arc<PacketHistory>) {
    for connection in listener.incoming() {
        match connection {
            Ok(stream) => {
                let history = Arc::clone(&history);
                let spawned = thread::Builder::new()
                    .name("md-replay-conn".to_string())
                    .spawn(move || serve_connection(stream, &history));
                if let Err(e) = spawned {
                    warn!(error = %e, "unable to spawn replay connection handler");
                }
            }
            Err(e) => warn!(error = %e, "replay accept failed"),
        }
    }
}

fn serve_connection(mut stream: TcpStream, history: &PacketHistory) {
    loop {
        let mut request_buf = [0u8; ReplayRequest::ENCODED_LEN];
        if stream.read_exact(&mut request_buf).is_err() {
            // client closed the connection
            return;
        }
        let request = ReplayRequest::decode(&request_buf);
        if resend_packets(&mut stream, history, request).is_err() {
            return;
        }
    }
}

fn resend_packets(
    stream: &mut TcpStream,
    history: &PacketHistory,
    request: ReplayRequest,
) -> Result<(), ExchangeError> {
    let packets = history.snapshot_range(request.start, request.end);
    let expected = request.end.saturating_sub(request.start);

    for data in &packets {
        let length = u16::try_from(data.len()).map_err(|_| {
            ExchangeError::decode("retained datagram exceeds replay frame size")
        })?;
        let framed = stream
            .write_all(&length.to_le_bytes())
            .and_then(|()| stream.write_all(data));
        if let Err(e) = framed {
            warn!(error = %e, "unable to write replay packets");
            return Err(e.into());
        }
    }

    let count = packets.len() as u64;
    if count != expected {
        warn!(
            start = request.start,
            end = request.end,
            missing = expected - count,
            "replay incomplete; packets fell out of the retention window"
        );
    } else {
        debug!(start = request.start, end = request.end, count, "replay complete");
    }
    Ok(())
}
