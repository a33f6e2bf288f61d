use alloc::collections::VecDeque;

use log::debug;

use crate::channel::ChannelAgent;
use crate::msgs::{self, Message};
use crate::policy::error::{invalid_state_error, ChannelError};
use crate::prelude::*;

/// Give up on an exchange that hasn't settled after this many messages
pub const MAX_EXCHANGE_MESSAGES: usize = 64;

/// Deliver one encoded message to `receiver`, returning its replies
pub fn deliver(receiver: &mut ChannelAgent, bytes: &[u8]) -> Result<Vec<Message>, ChannelError> {
    let message = msgs::from_vec(bytes)?;
    receiver.handle_message(&message)
}

/// Send `message` from `sender` to `receiver` and relay replies in both
/// directions until neither side has anything more to say.
///
/// Every hop goes through the wire encoding.  Returns the messages
/// delivered, in order.
pub fn exchange(
    sender: &mut ChannelAgent,
    receiver: &mut ChannelAgent,
    message: Message,
) -> Result<Vec<Message>, ChannelError> {
    let mut transcript = Vec::new();
    // (bound for receiver, encoded message)
    let mut queue: VecDeque<(bool, Vec<u8>)> = VecDeque::new();
    queue.push_back((true, message.as_vec()?));

    while let Some((to_receiver, bytes)) = queue.pop_front() {
        if transcript.len() >= MAX_EXCHANGE_MESSAGES {
            return Err(invalid_state_error(format!(
                "{}: exchange did not settle after {} messages",
                short_function!(),
                transcript.len()
            )));
        }
        let agent = if to_receiver { &mut *receiver } else { &mut *sender };
        let replies = deliver(agent, &bytes)?;
        let delivered = msgs::from_vec(&bytes)?;
        debug!(
            "{} {} -> {} replies",
            if to_receiver { ">>" } else { "<<" },
            delivered.command(),
            replies.len()
        );
        transcript.push(delivered);
        for reply in replies {
            queue.push_back((!to_receiver, reply.as_vec()?));
        }
    }
    Ok(transcript)
}
