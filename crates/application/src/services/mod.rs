mod message_service;
mod read_state_service;
mod room_service;

pub use message_service::{MessageService, MessageServiceDependencies, SendMessageRequest};
pub use read_state_service::{ReadStateService, ReadStateServiceDependencies};
pub use room_service::{CreateRoomRequest, RoomService, RoomServiceDependencies};
