//! Protocol module containing the frame type, the frame codec, and reply
//! parsing for the NCE USB command set.

pub mod codec;
pub mod frame;
pub mod reply;

pub use codec::{
    encode_accessory_signal, encode_cv_read, encode_cv_write, encode_cv_write_service,
    encode_emergency_stop, encode_emergency_stop_text, encode_function_group,
    encode_programming_track, encode_speed_and_direction, encode_speed_with_direction_arg,
    encode_speed_with_direction_text, encode_turnout, DirectionArg,
};
pub use frame::{CommandClass, Frame};
pub use reply::{parse_ack, parse_cv_read, ReplyCode, ReplyError};
