//! Outbound message aggregation.
//!
//! Commands queue per-channel messages during one reducer pass; at
//! quiescence the executor flushes. One queued message goes out as-is, two
//! or more are wrapped into a single `channel/batch` envelope. The buffer is
//! snapshotted before sending, so adapter callbacks that synchronously queue
//! new messages land in the next pass.

use std::collections::BTreeMap;

use vellum_types::message::ChannelMsg;

use crate::prelude::*;

#[derive(Debug, Default)]
pub struct OutboundBatcher {
	queues: BTreeMap<ChannelId, Vec<ChannelMsg>>,
}

impl OutboundBatcher {
	pub fn new() -> OutboundBatcher {
		OutboundBatcher::default()
	}

	/// Append a message to a channel's buffer. Only batchable messages are
	/// accepted; a batch never nests.
	pub fn queue(&mut self, channel_id: ChannelId, msg: ChannelMsg) {
		if !msg.batchable() {
			warn!("refusing to queue non-batchable {} message", msg.label());
			return;
		}
		self.queues.entry(channel_id).or_default().push(msg);
	}

	pub fn is_empty(&self) -> bool {
		self.queues.is_empty()
	}

	/// Drain the buffer, emitting one envelope per channel in queue order.
	pub fn flush(&mut self, mut send: impl FnMut(ChannelId, ChannelMsg)) {
		let queues = std::mem::take(&mut self.queues);
		for (channel_id, mut messages) in queues {
			match messages.len() {
				0 => {}
				1 => {
					let msg = messages.remove(0);
					send(channel_id, msg);
				}
				_ => send(channel_id, ChannelMsg::Batch { messages }),
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn directory_response(id: &str) -> ChannelMsg {
		ChannelMsg::DirectoryResponse { doc_ids: vec![DocId::from(id)] }
	}

	fn flush_all(batcher: &mut OutboundBatcher) -> Vec<(ChannelId, ChannelMsg)> {
		let mut sent = Vec::new();
		batcher.flush(|channel_id, msg| sent.push((channel_id, msg)));
		sent
	}

	#[test]
	fn single_message_is_sent_directly() {
		let mut batcher = OutboundBatcher::new();
		batcher.queue(ChannelId(1), directory_response("a"));
		let sent = flush_all(&mut batcher);
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].0, ChannelId(1));
		assert!(matches!(sent[0].1, ChannelMsg::DirectoryResponse { .. }));
	}

	#[test]
	fn multiple_messages_become_one_batch_in_queue_order() {
		let mut batcher = OutboundBatcher::new();
		batcher.queue(ChannelId(1), directory_response("a"));
		batcher.queue(ChannelId(1), directory_response("b"));
		batcher.queue(ChannelId(1), directory_response("c"));
		let sent = flush_all(&mut batcher);
		assert_eq!(sent.len(), 1);
		match &sent[0].1 {
			ChannelMsg::Batch { messages } => {
				assert_eq!(messages.len(), 3);
				let ids: Vec<_> = messages
					.iter()
					.map(|msg| match msg {
						ChannelMsg::DirectoryResponse { doc_ids } => doc_ids[0].as_str(),
						_ => panic!("unexpected message"),
					})
					.collect();
				assert_eq!(ids, ["a", "b", "c"]);
			}
			other => panic!("expected batch, got {}", other.label()),
		}
	}

	#[test]
	fn channels_do_not_mix() {
		let mut batcher = OutboundBatcher::new();
		batcher.queue(ChannelId(1), directory_response("a"));
		batcher.queue(ChannelId(2), directory_response("b"));
		let sent = flush_all(&mut batcher);
		assert_eq!(sent.len(), 2);
		assert!(sent.iter().all(|(_, msg)| !matches!(msg, ChannelMsg::Batch { .. })));
	}

	#[test]
	fn messages_queued_after_a_flush_land_in_the_next_pass() {
		let mut batcher = OutboundBatcher::new();
		batcher.queue(ChannelId(1), directory_response("a"));
		assert_eq!(flush_all(&mut batcher).len(), 1);
		assert!(batcher.is_empty());

		batcher.queue(ChannelId(1), directory_response("late"));
		let sent = flush_all(&mut batcher);
		assert_eq!(sent.len(), 1);
		assert!(matches!(&sent[0].1, ChannelMsg::DirectoryResponse { doc_ids } if doc_ids[0].as_str() == "late"));
	}

	#[test]
	fn batch_envelope_is_rejected_from_queueing() {
		let mut batcher = OutboundBatcher::new();
		batcher.queue(ChannelId(1), ChannelMsg::Batch { messages: vec![] });
		assert!(batcher.is_empty());
	}
}

// vim: ts=4
