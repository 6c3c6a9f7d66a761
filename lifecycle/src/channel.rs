//! Channel-scoped message routing
//!
//! | Channel | Write | Read |
//! |---|---|---|
//! | `public` | reporter, admins | any citizen, admins |
//! | `admin_citizen` | reporter, admins | reporter, admins |
//! | `worker` | current or past assignees, admins | current or past assignees, admins |
//!
//! Workers never see the public or admin-citizen channels. A write the
//! sender may not make fails with `ChannelForbidden`; it is never redirected
//! to another channel.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::engine::Engine;
use crate::error::{LifecycleError, LifecycleResult};
use crate::events::{EventBusExt, EventFilter, FilteredReceiver, LifecycleEvent};
use crate::state::{new_id, Actor, ActorId, Channel, Message, Record, Report, Role, WriteBatch};

/// Event types carried by a report feed; messages and per-recipient
/// notifications have their own feeds
const REPORT_FEED_EVENTS: &[&str] = &[
    "report_created",
    "status_changed",
    "worker_assigned",
    "proof_submitted",
    "proof_verified",
    "escalation_raised",
    "escalation_resolved",
];

/// Who is involved with a report, as far as channel access goes
#[derive(Debug, Clone)]
pub struct Participants {
    pub reporter_id: ActorId,
    /// Every worker ever assigned, active or not
    pub workers: HashSet<ActorId>,
}

impl Participants {
    fn is_reporter(&self, actor: &Actor) -> bool {
        actor.role == Role::Citizen && actor.id == self.reporter_id
    }

    fn is_assignee(&self, actor: &Actor) -> bool {
        actor.role == Role::Worker && self.workers.contains(&actor.id)
    }

    pub fn can_write(&self, actor: &Actor, channel: Channel) -> bool {
        if actor.is_admin() {
            return true;
        }
        match channel {
            Channel::Public | Channel::AdminCitizen => self.is_reporter(actor),
            Channel::Worker => self.is_assignee(actor),
        }
    }

    pub fn can_read(&self, actor: &Actor, channel: Channel) -> bool {
        if actor.is_admin() {
            return true;
        }
        match channel {
            Channel::Public => actor.role == Role::Citizen,
            Channel::AdminCitizen => self.is_reporter(actor),
            Channel::Worker => self.is_assignee(actor),
        }
    }

    /// Channels `actor` may read, in display order
    pub fn readable(&self, actor: &Actor) -> Vec<Channel> {
        Channel::all()
            .iter()
            .copied()
            .filter(|c| self.can_read(actor, *c))
            .collect()
    }
}

fn forbidden(report: &Report, actor: &Actor, channel: Channel) -> LifecycleError {
    LifecycleError::ChannelForbidden {
        report_id: report.id.clone(),
        actor_id: actor.id.clone(),
        role: actor.role,
        channel,
    }
}

impl Engine {
    /// Channel membership of a report
    pub fn participants(&self, report: &Report) -> LifecycleResult<Participants> {
        let workers = self
            .store()
            .report_assignments(&report.id)?
            .into_iter()
            .map(|a| a.worker_id)
            .collect();
        Ok(Participants {
            reporter_id: report.reporter_id.clone(),
            workers,
        })
    }

    /// Store a message in one channel. The message is durable before it is
    /// published to subscribers.
    pub fn write_message(
        &self,
        report_id: &str,
        sender: &Actor,
        channel: Channel,
        text: &str,
    ) -> LifecycleResult<Message> {
        let report = self.get_report(report_id)?;
        if !self.participants(&report)?.can_write(sender, channel) {
            debug!(report_id, sender = %sender.id, %channel, "Channel write refused");
            return Err(forbidden(&report, sender, channel));
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(LifecycleError::invalid_input("message text must not be empty"));
        }
        let max = self.config().max_message_len;
        if text.chars().count() > max {
            return Err(LifecycleError::invalid_input(format!(
                "message text exceeds {} characters",
                max
            )));
        }

        let message = Message {
            id: new_id(),
            report_id: report.id.clone(),
            sender_id: sender.id.clone(),
            sender_role: sender.role,
            channel,
            text: text.to_string(),
            created_at: self.now(),
        };

        let mut batch = WriteBatch::new();
        batch.put(Record::Message(message.clone()));
        self.commit(batch, Some(sender), None)?;

        info!(
            report_id,
            message_id = %message.id,
            sender = %sender.id,
            %channel,
            "Message posted"
        );
        self.publish(vec![LifecycleEvent::MessagePosted {
            message: message.clone(),
        }]);
        Ok(message)
    }

    /// Messages of one channel, oldest first
    pub fn read_messages(
        &self,
        report_id: &str,
        reader: &Actor,
        channel: Channel,
    ) -> LifecycleResult<Vec<Message>> {
        let report = self.get_report(report_id)?;
        if !self.participants(&report)?.can_read(reader, channel) {
            return Err(forbidden(&report, reader, channel));
        }
        Ok(self.store().channel_messages(report_id, channel)?)
    }

    /// Messages from every channel `reader` may read, merged by timestamp
    pub fn visible_messages(
        &self,
        report_id: &str,
        reader: &Actor,
    ) -> LifecycleResult<Vec<Message>> {
        let report = self.get_report(report_id)?;
        let mut messages = Vec::new();
        for channel in self.participants(&report)?.readable(reader) {
            messages.extend(self.store().channel_messages(report_id, channel)?);
        }
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    /// Live feed of one channel's new messages, after the read check.
    ///
    /// The feed has no history; load it with
    /// [`read_messages`](Self::read_messages).
    pub fn subscribe_channel(
        &self,
        report_id: &str,
        reader: &Actor,
        channel: Channel,
    ) -> LifecycleResult<FilteredReceiver> {
        let report = self.get_report(report_id)?;
        if !self.participants(&report)?.can_read(reader, channel) {
            return Err(forbidden(&report, reader, channel));
        }
        Ok(self
            .bus()
            .subscribe_filtered(EventFilter::new().report(report_id).channel(channel)))
    }

    /// Live feed of a report's lifecycle changes for anyone involved with it.
    /// Messages and notifications are not part of it.
    pub fn subscribe_report(
        &self,
        report_id: &str,
        actor: &Actor,
    ) -> LifecycleResult<FilteredReceiver> {
        let report = self.get_report(report_id)?;
        let participants = self.participants(&report)?;
        let involved = actor.is_admin()
            || participants.is_reporter(actor)
            || participants.is_assignee(actor);
        if !involved {
            return Err(LifecycleError::Forbidden {
                actor_id: actor.id.clone(),
                role: actor.role,
                action: "follow this report",
            });
        }
        Ok(self.bus().subscribe_filtered(
            EventFilter::new()
                .report(report_id)
                .without_messages()
                .types(REPORT_FEED_EVENTS.to_vec()),
        ))
    }

    /// Live feed of notifications addressed to `actor`
    pub fn subscribe_notifications(&self, actor: &Actor) -> FilteredReceiver {
        self.bus()
            .subscribe_filtered(EventFilter::new().recipient(&actor.id))
    }
}
