use hookway::subscriptions::{Broker, BrokerError, Client, Message};
use std::sync::Arc;
use std::time::Duration;

fn broker_with(topics: &[&[&str]]) -> (Broker, Vec<Arc<Client>>) {
    let broker = Broker::new();
    let clients = topics
        .iter()
        .map(|subs| {
            let client = Arc::new(Client::new());
            client.subscribe(subs.iter().copied());
            broker.register(Arc::clone(&client));
            client
        })
        .collect();
    (broker, clients)
}

#[tokio::test]
async fn fan_out_to_subscribed_clients() {
    let (broker, clients) = broker_with(&[&["posts"], &["posts", "users"], &["users"]]);

    let mut delivered = 0;
    for chunk in broker.chunked_clients(2) {
        for client in chunk {
            if client.has_subscription("posts") {
                assert!(client.send(Message::new("posts", r#"{"action":"create"}"#)).await);
                delivered += 1;
            }
        }
    }
    assert_eq!(delivered, 2);

    let mut out = Vec::new();
    let msg = clients[0].recv().await.unwrap();
    msg.write_sse(&mut out, "1").unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("event:posts"));
    assert!(text.contains(r#"data:{"action":"create"}"#));
}

#[tokio::test]
async fn late_deliveries_after_unregister_are_silent() {
    let (broker, clients) = broker_with(&[&["posts"]]);
    let client = Arc::clone(&clients[0]);

    // fill the single slot so the next send has to wait
    assert!(client.send(Message::new("posts", "1")).await);
    let producer = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.send(Message::new("posts", "2")).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    broker.unregister(client.id());
    assert!(!producer.await.unwrap());
    assert!(client.recv().await.is_none());
    assert!(matches!(
        broker.client_by_id(client.id()),
        Err(BrokerError::NotRegistered(_))
    ));
    assert_eq!(broker.total_clients(), 0);
}

#[tokio::test]
async fn concurrent_registration() {
    let broker = Arc::new(Broker::new());
    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                let client = Arc::new(Client::new());
                broker.register(Arc::clone(&client));
                client.id().to_string()
            })
        })
        .collect();

    let ids: Vec<String> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(broker.total_clients(), 32);
    for id in &ids {
        assert!(broker.client_by_id(id).is_ok());
    }
    assert_eq!(broker.clients().len(), 32);
}
