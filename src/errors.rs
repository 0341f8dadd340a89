/// Errors surfaced by forest operations.
///
/// Expected streaming conditions (an internal shingle that is still filling)
/// are signalled by sentinel return values, never by an error. An error here
/// means the caller handed in something unusable (`InvalidArgument`), the
/// arena ran out of room after growth and compaction both failed
/// (`CapacityExhausted`), or an internal invariant did not hold and the model
/// can no longer be trusted (`CorruptState`).
#[derive(Debug, PartialEq)]
pub enum ForestError {
    InvalidArgument { msg: &'static str },
    CapacityExhausted { msg: &'static str },
    CorruptState { msg: &'static str },
}
