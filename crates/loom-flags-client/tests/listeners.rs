// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod support;

use std::sync::Arc;

use loom_flags_client::{Flag, FlagChangeKind, FlagsClient};
use parking_lot::Mutex;
use support::{settle, Feed, Recorder, MOBILE_KEY, WAIT};

async fn client_with(feed: &Feed) -> FlagsClient {
	FlagsClient::builder()
		.mobile_key(MOBILE_KEY)
		.data_source_factory(feed.factory())
		.build()
		.await
		.unwrap()
}

#[tokio::test]
async fn test_listener_fires_once_per_change() {
	let feed = Feed::new();
	let client = client_with(&feed).await;
	let recorder = Recorder::default();
	client.register_listener("flag-a", recorder.listener()).unwrap();

	feed.put(vec![Flag::new("flag-a", true)]);
	let calls = recorder.wait_for(1).await;
	assert_eq!(calls, vec![("flag-a".to_string(), FlagChangeKind::Updated)]);

	// Identical replacement changes nothing.
	feed.put(vec![Flag::new("flag-a", true).with_version(1)]);
	settle().await;
	assert_eq!(recorder.count(), 1);

	feed.patch(Flag::new("flag-a", false).with_version(2));
	feed.delete("flag-a", 3);
	let calls = recorder.wait_for(3).await;
	assert_eq!(calls[1].1, FlagChangeKind::Updated);
	assert_eq!(calls[2].1, FlagChangeKind::Deleted);

	client.close().await;
}

#[tokio::test]
async fn test_listener_only_hears_its_key() {
	let feed = Feed::new();
	let client = client_with(&feed).await;
	let a = Recorder::default();
	let b = Recorder::default();
	client.register_listener("flag-a", a.listener()).unwrap();
	client.register_listener("flag-b", b.listener()).unwrap();

	feed.put(vec![Flag::new("flag-a", 1), Flag::new("flag-b", 1)]);
	a.wait_for(1).await;
	b.wait_for(1).await;

	feed.patch(Flag::new("flag-b", 2).with_version(1));
	b.wait_for(2).await;
	settle().await;
	assert_eq!(a.count(), 1);

	client.close().await;
}

#[tokio::test]
async fn test_unregistered_listener_is_not_called() {
	let feed = Feed::new();
	let client = client_with(&feed).await;
	let kept = Recorder::default();
	let removed = Recorder::default();

	client.register_listener("flag-a", kept.listener()).unwrap();
	let id = client.register_listener("flag-a", removed.listener()).unwrap();
	assert!(client.unregister_listener("flag-a", id));
	assert!(!client.unregister_listener("flag-a", id));

	feed.put(vec![Flag::new("flag-a", true)]);
	kept.wait_for(1).await;
	assert_eq!(removed.count(), 0);

	client.close().await;
}

#[tokio::test]
async fn test_listener_reads_new_value_through_client() {
	let feed = Feed::new();
	let client = client_with(&feed).await;
	let seen = Arc::new(Mutex::new(Vec::new()));

	{
		let reader = client.clone();
		let seen = Arc::clone(&seen);
		client
			.register_listener("flag-a", move |key: &str, _kind: FlagChangeKind| {
				seen.lock().push(reader.int_variation(key, -1));
			})
			.unwrap();
	}

	feed.put(vec![Flag::new("flag-a", 1)]);
	client.wait_for_initialization(WAIT).await;
	feed.patch(Flag::new("flag-a", 2).with_version(1));
	support::wait_until(|| seen.lock().len() == 2).await;

	assert_eq!(*seen.lock(), vec![1, 2]);
	client.close().await;
}

#[tokio::test]
async fn test_panicking_listener_does_not_block_others() {
	let feed = Feed::new();
	let client = client_with(&feed).await;
	let recorder = Recorder::default();

	client
		.register_listener("flag-a", |_: &str, _: FlagChangeKind| panic!("listener failure"))
		.unwrap();
	client.register_listener("flag-a", recorder.listener()).unwrap();

	feed.put(vec![Flag::new("flag-a", true)]);
	recorder.wait_for(1).await;
	feed.patch(Flag::new("flag-a", false).with_version(1));
	recorder.wait_for(2).await;

	client.close().await;
}

#[tokio::test]
async fn test_close_delivers_pending_notifications() {
	let feed = Feed::new();
	let client = client_with(&feed).await;
	let recorder = Recorder::default();
	client.register_listener("flag-a", recorder.listener()).unwrap();

	feed.put(vec![Flag::new("flag-a", true)]);
	client.wait_for_initialization(WAIT).await;
	client.close().await;

	assert_eq!(recorder.count(), 1);
}
