//! Loopback example: opens a channel on an in-memory connection, declares a
//! queue, consumes from it and feeds deliveries back in.
//!
//! Run with:
//!   cargo run --example loopback
//!   cargo run --example loopback -- --debug

use std::cell::RefCell;
use std::rc::Rc;

use amqmux::channel::{Channel, ConsumeOptions, Connection, MemoryConnection};
use amqmux::frame::{
    BasicDeliver, BasicProperties, ExchangeDeclare, QueueBind, QueueDeclare, REPLY_SUCCESS,
};
use tracing::info;
use tracing::level_filters::LevelFilter;

fn init_logging(level: LevelFilter) {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_ansi(false)
        .with_target(false)
        .try_init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let level = if std::env::args().any(|arg| arg == "--debug") {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };
    init_logging(level);

    let connection = Rc::new(MemoryConnection::loopback().with_frame_max(4096));
    let channel = Channel::open(connection.clone())?;

    channel.exchange_declare(ExchangeDeclare {
        exchange: "jobs".to_string(),
        ..ExchangeDeclare::default()
    })?;
    let queue = channel
        .queue_declare(QueueDeclare::default())?
        .map(|ok| ok.queue)
        .unwrap_or_default();
    channel.queue_bind(QueueBind {
        queue: queue.clone(),
        exchange: "jobs".to_string(),
        routing_key: "resize".to_string(),
        ..QueueBind::default()
    })?;
    channel.qos(0, 10, false)?;

    let received = Rc::new(RefCell::new(0usize));
    let counter = Rc::clone(&received);
    let tag = channel.consume(
        move |channel, deliver, properties, body| {
            info!(
                delivery_tag = deliver.delivery_tag,
                content_type = ?properties.content_type,
                bytes = body.len(),
                "message received"
            );
            *counter.borrow_mut() += 1;
            if let Err(err) = channel.ack(deliver.delivery_tag, false) {
                eprintln!("ack failed: {err}");
            }
        },
        &queue,
        ConsumeOptions::default(),
    )?;

    // A broker would route published messages back as deliveries; the memory
    // connection only records them, so feed the deliveries in by hand.
    for delivery_tag in 1..=3u64 {
        let body = vec![b'x'; 3000 * delivery_tag as usize];
        channel.publish("jobs", "resize", body.clone(), None)?;
        connection.push_content(
            channel.number(),
            BasicDeliver {
                consumer_tag: tag.clone(),
                delivery_tag,
                redelivered: false,
                exchange: "jobs".to_string(),
                routing_key: "resize".to_string(),
            },
            BasicProperties::default().with_content_type("application/octet-stream"),
            body,
        )?;
    }
    connection.drain_events(None)?;

    channel.cancel(&tag)?;
    channel.close(REPLY_SUCCESS, "done")?;

    eprintln!(
        "received {} messages, {} methods sent",
        received.borrow(),
        connection.sent().len()
    );
    Ok(())
}
