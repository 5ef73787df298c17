//! Request/response pairing unit
//!
//! A transaction is shared between the two directions of a flow and the
//! pipeline, so it is handed around by reference-counted handle. It goes
//! away once the last holder lets go.

use crate::enums::MethodId;
use log::trace;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared handle to a transaction
pub type TransactionHandle = Rc<RefCell<Transaction>>;

/// One request and its eventual response
#[derive(Debug)]
pub struct Transaction {
    /// Position of the request within its flow, starting at 1
    trans_num: u64,
    method: MethodId,
    status_code: Option<u16>,
    response_seen: bool,
    final_response: bool,
}

impl Transaction {
    pub fn new(trans_num: u64) -> Self {
        Self {
            trans_num,
            method: MethodId::NotPresent,
            status_code: None,
            response_seen: false,
            final_response: false,
        }
    }

    /// Create and wrap in a shared handle
    pub fn new_handle(trans_num: u64) -> TransactionHandle {
        Rc::new(RefCell::new(Self::new(trans_num)))
    }

    pub fn trans_num(&self) -> u64 {
        self.trans_num
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn set_method(&mut self, method: MethodId) {
        self.method = method;
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn set_status_code(&mut self, code: u16) {
        self.status_code = Some(code);
    }

    /// A response has been attached to this transaction
    pub fn response_seen(&self) -> bool {
        self.response_seen
    }

    pub fn set_response_seen(&mut self) {
        self.response_seen = true;
    }

    /// Whether the response being parsed completes the transaction.
    /// Informational (1xx) responses are followed by another response.
    /// Decided by the status-line parser, never guessed here.
    pub fn final_response(&self) -> bool {
        self.final_response
    }

    pub fn set_final_response(&mut self, is_final: bool) {
        self.final_response = is_final;
    }

    /// Release one holder's handle
    pub fn delete_transaction(handle: Option<TransactionHandle>) {
        let Some(handle) = handle else {
            return;
        };

        let trans_num = handle.borrow().trans_num;
        let holders = Rc::strong_count(&handle) - 1;
        drop(handle);

        if holders == 0 {
            trace!("transaction {} deleted", trans_num);
        } else {
            trace!("transaction {} released, {} holder(s) remain", trans_num, holders);
        }
    }
}
