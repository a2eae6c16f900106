use std::borrow::Cow;

use ost_core::{CoreError, codes};

use crate::descriptor::Direction;

/// 描述一次批量操作对应的默认文案。
#[derive(Clone, Copy)]
pub(crate) struct OperationKind {
    pub message: &'static str,
}

pub(crate) const PUT: OperationKind = OperationKind {
    message: "bulk put",
};
pub(crate) const GET: OperationKind = OperationKind {
    message: "bulk get",
};
pub(crate) const ATTACH: OperationKind = OperationKind {
    message: "bulk attach",
};

impl OperationKind {
    pub(crate) fn for_direction(direction: Direction) -> Self {
        match direction {
            Direction::PutSource => PUT,
            Direction::GetSink => GET,
        }
    }
}

pub(crate) fn timeout_error(kind: OperationKind, xid: u64) -> CoreError {
    CoreError::new(
        codes::BULK_TIMEOUT,
        Cow::Owned(format!("{} xid {} timed out", kind.message, xid)),
    )
}

pub(crate) fn aborted_error(kind: OperationKind, xid: u64) -> CoreError {
    CoreError::new(
        codes::BULK_ABORTED,
        Cow::Owned(format!("{} xid {} aborted", kind.message, xid)),
    )
}

pub(crate) fn failed_error(kind: OperationKind, xid: u64, reason: &str) -> CoreError {
    CoreError::new(
        codes::BULK_FAILED,
        Cow::Owned(format!("{} xid {} failed: {}", kind.message, xid, reason)),
    )
}

pub(crate) fn channel_closed(kind: OperationKind, xid: u64) -> CoreError {
    CoreError::new(
        codes::BULK_CHANNEL_CLOSED,
        Cow::Owned(format!("{} xid {}: channel closed", kind.message, xid)),
    )
}

pub(crate) fn already_submitted(kind: OperationKind, xid: u64) -> CoreError {
    CoreError::new(
        codes::BULK_ALREADY_SUBMITTED,
        Cow::Owned(format!("{} xid {}: descriptor already submitted", kind.message, xid)),
    )
}

pub(crate) fn wrong_direction(kind: OperationKind, xid: u64, actual: Direction) -> CoreError {
    CoreError::new(
        codes::BULK_WRONG_DIRECTION,
        Cow::Owned(format!(
            "{} xid {}: descriptor was prepared as {:?}",
            kind.message, xid, actual
        )),
    )
}
