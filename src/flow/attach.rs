//! Pairing requests with responses
//!
//! Each request line starts a new transaction. The previous request's
//! transaction, if its response has not started yet, is parked in the
//! pipeline. Each status line takes the oldest parked transaction, or the
//! current request's if nothing is parked. A status line with no request
//! at all gets an orphan transaction and pipelining is abandoned.

use super::FlowState;
use crate::anomaly::codes::{
    EVENT_PIPELINE_MAX, EVENT_RESPONSE_WO_REQUEST, INF_PIPELINE_OVERFLOW, INF_RESPONSE_WO_REQUEST,
};
use crate::enums::{Direction, SectionType};
use crate::transaction::{Transaction, TransactionHandle};
use log::{debug, warn};
use std::rc::Rc;

impl FlowState {
    /// Transaction the section now starting in `direction` belongs to,
    /// creating and pairing transactions at request and status lines.
    pub fn attach_transaction(&mut self, direction: Direction) -> TransactionHandle {
        let type_expected = self.half[direction].type_expected;

        match (direction, type_expected) {
            (Direction::Client, SectionType::Request) => self.attach_request(),
            (Direction::Server, SectionType::Status) => self.attach_response(),
            _ => {
                let trans_num = self.half[direction].expected_trans_num;
                Rc::clone(
                    self.half[direction]
                        .transaction
                        .get_or_insert_with(|| Transaction::new_handle(trans_num)),
                )
            }
        }
    }

    fn attach_request(&mut self) -> TransactionHandle {
        if let Some(previous) = self.half.client.transaction.take() {
            let answered = previous.borrow().response_seen();
            if answered || self.pipeline.underflow() {
                // Either paired already or nobody will ever take it
                Transaction::delete_transaction(Some(previous));
            } else if self.pipeline.overflow() || !self.add_to_pipeline(Rc::clone(&previous)) {
                warn!(
                    "[flow={}] pipeline full, dropping transaction {}",
                    self.seq_num,
                    previous.borrow().trans_num()
                );
                self.record_infraction(Direction::Client, INF_PIPELINE_OVERFLOW);
                self.record_event(Direction::Client, EVENT_PIPELINE_MAX);
                Transaction::delete_transaction(Some(previous));
            }
        }

        let transaction = Transaction::new_handle(self.half.client.expected_trans_num);
        self.half.client.transaction = Some(Rc::clone(&transaction));
        transaction
    }

    fn attach_response(&mut self) -> TransactionHandle {
        // An interim (1xx) response is followed by the real one on the
        // same transaction
        let interim = self.half.server.transaction.as_ref().filter(|t| {
            let t = t.borrow();
            t.response_seen() && !t.final_response()
        });
        if let Some(current) = interim {
            return Rc::clone(current);
        }
        Transaction::delete_transaction(self.half.server.transaction.take());

        // Parked requests still drain after an overflow. Only an underflow
        // means the pairing has been lost for good.
        let queued = if self.pipeline.underflow() {
            None
        } else {
            self.take_from_pipeline()
        };
        let paired = queued.or_else(|| {
            self.half
                .client
                .transaction
                .as_ref()
                .filter(|t| !t.borrow().response_seen())
                .cloned()
        });

        let transaction = match paired {
            Some(transaction) => transaction,
            None => {
                debug!(
                    "[flow={}] response {} has no request",
                    self.seq_num, self.half.server.expected_trans_num
                );
                self.mark_pipeline_underflow();
                self.record_infraction(Direction::Server, INF_RESPONSE_WO_REQUEST);
                self.record_event(Direction::Server, EVENT_RESPONSE_WO_REQUEST);
                Transaction::new_handle(self.half.server.expected_trans_num)
            }
        };

        transaction.borrow_mut().set_response_seen();
        self.half.server.transaction = Some(Rc::clone(&transaction));
        transaction
    }
}
