// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::EventSink;
use crate::api::SocketEvent;
use crate::api::SocketTime;
use crate::logging::log_packet;
#[cfg(not(test))]
use log::info;
use std::cell::RefCell;
use std::collections::VecDeque;
#[cfg(test)]
use std::println as info;
use std::rc::Rc;

/// Events waiting to be polled by the embedder, in the order they were generated.
pub(crate) struct Events {
    events: VecDeque<SocketEvent>,
}

impl Events {
    pub fn new() -> Self {
        Self { events: VecDeque::new() }
    }
}

impl EventSink for Events {
    fn add(&mut self, event: SocketEvent) {
        self.events.push_back(event);
    }

    fn next_event(&mut self) -> Option<SocketEvent> {
        self.events.pop_front()
    }
}

/// Logs every event, and dumps sent packets, before passing them on to `parent`.
pub(crate) struct LoggingEvents {
    parent: Rc<RefCell<dyn EventSink>>,
    name: String,
    now: Rc<RefCell<SocketTime>>,
}

impl LoggingEvents {
    pub fn new(
        parent: Rc<RefCell<dyn EventSink>>,
        name: String,
        now: Rc<RefCell<SocketTime>>,
    ) -> LoggingEvents {
        Self { parent, name, now }
    }
}

impl EventSink for LoggingEvents {
    fn add(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::SendPacket(_, ref data) => {
                let now = *self.now.borrow();
                log_packet(&self.name, now.into(), true, data);
            }
            SocketEvent::OnMessage(id, ref message) => info!(
                "{}: OnMessage({id}, stream={}, ppid={}, {} bytes)",
                self.name,
                message.stream_id,
                message.ppid,
                message.payload.len()
            ),
            ref e => info!("{}: {:?}", self.name, e),
        }
        self.parent.borrow_mut().add(event);
    }

    fn next_event(&mut self) -> Option<SocketEvent> {
        self.parent.borrow_mut().next_event()
    }
}
