use super::helper::{self, Consumer, Leaver};
use anyhow::Result;
use qtools_engine::{DeliveryState, Message};

#[tokio::test]
async fn first_registered_consumer_gets_the_message() -> Result<()> {
    let broker = helper::start_broker().await?;

    let (first, first_opened) = Consumer::new(&broker, Some("q1"), 10, 1);
    let (_, first_handle) = helper::spawn(first);
    helper::within(first_opened).await??;

    let (second, second_opened) = Consumer::new(&broker, Some("q1"), 10, 0);
    let (second_stop, second_handle) = helper::spawn(second);
    helper::within(second_opened).await??;

    let producer = helper::produce(&broker, Some("q1"), helper::texts(&["hello"])).await?;
    assert_eq!(producer.outcomes, vec![Some(DeliveryState::Accepted)]);

    let first = helper::within(first_handle).await???;
    assert_eq!(first.bodies(), vec!["hello"]);

    second_stop.inject(())?;

    let second = helper::within(second_handle).await???;
    assert!(second.received.is_empty());

    Ok(())
}

#[tokio::test]
async fn messages_wait_for_the_next_consumer() -> Result<()> {
    let broker = helper::start_broker().await?;

    // no credit, nothing is forwarded to it
    let (idle, idle_opened) = Consumer::new(&broker, Some("q-c"), 0, 0);
    let (idle_stop, idle_handle) = helper::spawn(idle);
    helper::within(idle_opened).await??;

    let producer = helper::produce(&broker, Some("q-c"), helper::texts(&["m1", "m2", "m3"])).await?;
    assert_eq!(producer.outcomes.len(), 3);

    idle_stop.inject(())?;

    let idle = helper::within(idle_handle).await???;
    assert!(idle.received.is_empty());

    let (next, _) = Consumer::new(&broker, Some("q-c"), 10, 3);
    let (_, next_handle) = helper::spawn(next);

    let next = helper::within(next_handle).await???;
    assert_eq!(next.bodies(), vec!["m1", "m2", "m3"]);

    Ok(())
}

#[tokio::test]
async fn messages_are_forwarded_as_credit_allows() -> Result<()> {
    let broker = helper::start_broker().await?;

    let bodies: Vec<String> = (0..25).map(|i| format!("m{}", i)).collect();
    let texts: Vec<&str> = bodies.iter().map(String::as_str).collect();

    helper::produce(&broker, Some("q-credit"), helper::texts(&texts)).await?;

    // prefetch 4 makes the consumer top up its credit several times
    let (consumer, _) = Consumer::new(&broker, Some("q-credit"), 4, 25);
    let (_, handle) = helper::spawn(consumer);

    let consumer = helper::within(handle).await???;
    assert_eq!(consumer.bodies(), texts);

    Ok(())
}

#[tokio::test]
async fn dynamic_consumers_get_unique_addresses() -> Result<()> {
    let broker = helper::start_broker().await?;

    let (first, first_opened) = Consumer::new(&broker, None, 10, 1);
    let (_, first_handle) = helper::spawn(first);
    let first_address = helper::within(first_opened).await??.unwrap();

    let (second, second_opened) = Consumer::new(&broker, None, 10, 0);
    let (second_stop, second_handle) = helper::spawn(second);
    let second_address = helper::within(second_opened).await??.unwrap();

    assert!(!first_address.is_empty());
    assert_ne!(first_address, second_address);

    helper::produce(&broker, Some(&first_address), helper::texts(&["private"])).await?;

    let first = helper::within(first_handle).await???;
    assert_eq!(first.bodies(), vec!["private"]);

    second_stop.inject(())?;

    let second = helper::within(second_handle).await???;
    assert!(second.received.is_empty());

    Ok(())
}

#[tokio::test]
async fn anonymous_sender_routes_by_message_address() -> Result<()> {
    let broker = helper::start_broker().await?;

    let producer = helper::produce(
        &broker,
        None,
        vec![Message::text("routed").address("q-anon"), Message::text("lost")],
    )
    .await?;

    assert_eq!(
        producer.outcomes,
        vec![Some(DeliveryState::Accepted), Some(DeliveryState::Rejected)]
    );

    let (consumer, _) = Consumer::new(&broker, Some("q-anon"), 10, 1);
    let (_, handle) = helper::spawn(consumer);

    let consumer = helper::within(handle).await???;
    assert_eq!(consumer.bodies(), vec!["routed"]);

    Ok(())
}

#[tokio::test]
async fn consumer_without_address_is_refused() -> Result<()> {
    let broker = helper::start_broker().await?;

    let (mut consumer, _) = Consumer::new(&broker, None, 10, 0);
    consumer.dynamic = false;

    let (_, handle) = helper::spawn(consumer);

    let consumer = helper::within(handle).await???;
    assert!(consumer.refused);

    Ok(())
}

#[tokio::test]
async fn messages_wait_after_consumer_detaches() -> Result<()> {
    let broker = helper::start_broker().await?;

    let (leaver, opened, detached) = Leaver::new(&broker, "q-detach");
    let (leaver_input, leaver_handle) = helper::spawn(leaver);
    helper::within(opened).await??;

    // only the link goes, the connection stays open
    leaver_input.inject(())?;
    helper::within(detached).await??;

    let producer = helper::produce(&broker, Some("q-detach"), helper::texts(&["m1", "m2", "m3"])).await?;
    assert_eq!(producer.outcomes.len(), 3);

    let (next, _) = Consumer::new(&broker, Some("q-detach"), 10, 3);
    let (_, next_handle) = helper::spawn(next);

    let next = helper::within(next_handle).await???;
    assert_eq!(next.bodies(), vec!["m1", "m2", "m3"]);

    leaver_input.inject(())?;

    let leaver = helper::within(leaver_handle).await???;
    assert!(leaver.received.is_empty());

    Ok(())
}

#[tokio::test]
async fn messages_wait_after_consumer_disconnects() -> Result<()> {
    let broker = helper::start_broker().await?;

    // no credit, so nothing can be lost on the dropped socket
    let (gone, gone_opened) = Consumer::new(&broker, Some("q-drop"), 0, 0);
    let (_, gone_handle) = helper::spawn(gone);
    helper::within(gone_opened).await??;

    // the socket is dropped without closing the connection
    gone_handle.abort();
    assert!(helper::within(gone_handle).await?.is_err());

    let producer = helper::produce(&broker, Some("q-drop"), helper::texts(&["m1", "m2", "m3"])).await?;
    assert_eq!(producer.outcomes, vec![Some(DeliveryState::Accepted); 3]);

    let (next, _) = Consumer::new(&broker, Some("q-drop"), 10, 3);
    let (_, next_handle) = helper::spawn(next);

    let next = helper::within(next_handle).await???;
    assert_eq!(next.bodies(), vec!["m1", "m2", "m3"]);

    Ok(())
}
