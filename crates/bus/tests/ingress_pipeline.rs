use std::sync::Arc;
use std::time::Duration;

use parley_bus::{
    BusConsumer, BusPublisher, BusTransport, ConsumerExit, InMemoryBus, ReconnectPolicy,
};
use parley_core::classifier::Classifier;
use parley_core::domain::message::{ConversationId, Message, MessageKind};
use parley_core::flow::FlowCoordinator;
use parley_core::store::ConversationStore;

const TOPIC: &str = "chat-messages";

async fn wait_for_messages(store: &ConversationStore, conversation: &ConversationId, count: usize) {
    for _ in 0..200 {
        if store.stats(conversation).is_some_and(|stats| stats.message_count >= count) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("conversation never reached {count} messages");
}

#[tokio::test]
async fn published_messages_flow_into_the_store_and_junk_is_skipped() {
    let bus = InMemoryBus::new();
    let transport: Arc<dyn BusTransport> = Arc::new(bus.clone());
    let store = Arc::new(ConversationStore::new());
    let coordinator = Arc::new(FlowCoordinator::new(store.clone(), Classifier::default()));

    let consumer =
        BusConsumer::new(transport.clone(), TOPIC, "parley-flow", ReconnectPolicy::default());
    let cancel = consumer.cancellation_token();
    let subscription = consumer.subscribe().await.expect("subscribe");
    let ingress = {
        let coordinator = coordinator.clone();
        tokio::spawn(
            async move { consumer.run_with(Some(subscription), coordinator.as_ref()).await },
        )
    };

    let publisher = BusPublisher::new(transport.clone(), TOPIC);
    let opener = Message::new(MessageKind::User, "main-conversation", "user", "I love programming");
    publisher
        .publish(&opener)
        .await
        .expect("publish user message");
    transport.publish(TOPIC, b"{not json".to_vec()).await.expect("publish junk");
    publisher
        .publish(
            &Message::new(MessageKind::Agent, "main-conversation", "agent-1", "wow, nice")
                .with_display_name("Ada"),
        )
        .await
        .expect("publish agent message");

    let conversation = ConversationId::from("main-conversation");
    wait_for_messages(&store, &conversation, 2).await;

    let stats = coordinator.stats(&conversation).expect("stats");
    assert_eq!(stats.message_count, 2);
    assert_eq!(stats.participant_count, 2);
    assert_eq!(stats.topic.as_deref(), Some("technology"));
    assert_eq!(stats.mood.as_deref(), Some("excited"));

    cancel.cancel();
    assert_eq!(ingress.await.expect("ingress task"), ConsumerExit::Cancelled);
}

#[tokio::test]
async fn shutting_down_the_bus_ends_the_ingress_consumer() {
    let bus = InMemoryBus::new();
    let transport: Arc<dyn BusTransport> = Arc::new(bus.clone());
    let coordinator =
        Arc::new(FlowCoordinator::new(Arc::new(ConversationStore::new()), Classifier::default()));
    let consumer = BusConsumer::new(transport, TOPIC, "parley-flow", ReconnectPolicy::default());
    let subscription = consumer.subscribe().await.expect("subscribe");

    bus.shutdown();

    assert_eq!(
        consumer.run_with(Some(subscription), coordinator.as_ref()).await,
        ConsumerExit::StreamClosed
    );
}
