use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use amqmux::channel::{Channel, ChannelError, ConsumeOptions, Connection, MemoryConnection};
use amqmux::frame::{
    BasicDeliver, BasicProperties, ExchangeDeclare, Method, MethodKind, QueueBind, QueueDeclare,
    REPLY_SUCCESS,
};

fn deliver(consumer_tag: &str, delivery_tag: u64) -> BasicDeliver {
    BasicDeliver {
        consumer_tag: consumer_tag.to_string(),
        delivery_tag,
        redelivered: false,
        exchange: "tasks".to_string(),
        routing_key: "resize".to_string(),
    }
}

#[test]
fn work_queue_session() {
    let connection = Rc::new(MemoryConnection::loopback());
    let channel = Channel::open(connection.clone()).unwrap();

    channel
        .exchange_declare(ExchangeDeclare {
            exchange: "tasks".to_string(),
            kind: "topic".to_string(),
            durable: true,
            ..ExchangeDeclare::default()
        })
        .unwrap();
    let queue = channel
        .queue_declare(QueueDeclare {
            queue: "resize".to_string(),
            durable: true,
            ..QueueDeclare::default()
        })
        .unwrap()
        .unwrap()
        .queue;
    channel
        .queue_bind(QueueBind {
            queue: queue.clone(),
            exchange: "tasks".to_string(),
            routing_key: "resize.*".to_string(),
            ..QueueBind::default()
        })
        .unwrap();
    channel.qos(0, 1, false).unwrap();

    let bodies = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&bodies);
    let tag = channel
        .consume(
            move |channel, deliver, _, body: &Bytes| {
                seen.borrow_mut().push(body.clone());
                if body.is_empty() {
                    channel.reject(deliver.delivery_tag, false).unwrap();
                } else {
                    channel.ack(deliver.delivery_tag, false).unwrap();
                }
            },
            &queue,
            ConsumeOptions::default(),
        )
        .unwrap();

    for (delivery_tag, body) in [(1, "img-1.png"), (2, ""), (3, "img-3.png")] {
        connection
            .push_content(
                channel.number(),
                deliver(&tag, delivery_tag),
                BasicProperties::default(),
                body,
            )
            .unwrap();
    }
    connection.drain_events(None).unwrap();
    channel.cancel(&tag).unwrap();
    channel.close(REPLY_SUCCESS, "done").unwrap();

    assert_eq!(bodies.borrow().len(), 3);
    let kinds: Vec<MethodKind> = connection
        .sent()
        .iter()
        .map(|sent| sent.method.kind())
        .collect();
    assert_eq!(
        kinds,
        vec![
            MethodKind::ChannelOpen,
            MethodKind::ExchangeDeclare,
            MethodKind::QueueDeclare,
            MethodKind::QueueBind,
            MethodKind::BasicQos,
            MethodKind::BasicConsume,
            MethodKind::BasicAck,
            MethodKind::BasicReject,
            MethodKind::BasicAck,
            MethodKind::BasicCancel,
            MethodKind::ChannelClose,
        ]
    );
    let rejected = connection
        .sent()
        .into_iter()
        .find_map(|sent| match sent.method {
            Method::BasicReject(reject) => Some(reject),
            _ => None,
        })
        .unwrap();
    assert_eq!(rejected.delivery_tag, 2);
    assert!(!rejected.requeue);
}

#[test]
fn channels_share_one_connection() {
    let connection = Rc::new(MemoryConnection::loopback());
    let first = Channel::open(connection.clone()).unwrap();
    let second = Channel::open(connection.clone()).unwrap();
    assert_eq!(connection.channel_numbers(), vec![1, 2]);

    first.close(REPLY_SUCCESS, "done").unwrap();
    assert!(second.is_open());
    assert_eq!(connection.channel_numbers(), vec![2]);

    second.publish("", "jobs", "still here", None).unwrap();
    assert!(matches!(
        first.publish("", "jobs", "gone", None),
        Err(ChannelError::ChannelClosed(_))
    ));
}
