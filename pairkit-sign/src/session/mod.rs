//! Session engine and session wire types.

mod engine;
mod types;

pub use engine::{Connection, SessionEngine, PROPOSALS_COLLECTION, SESSIONS_COLLECTION};
pub use types::{
    EventPayload, Participant, RequestPayload, Session, SessionEventParams, SessionExtendParams,
    SessionProposal, SessionProposeParams, SessionProposeResponse, SessionRequest,
    SessionRequestParams, SessionSettleParams, SessionUpdateParams, SignEvent,
};
