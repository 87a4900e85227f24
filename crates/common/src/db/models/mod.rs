//! SeaORM entity models

mod conversation;

pub use conversation::{
    ActiveModel as ConversationActiveModel, Column as ConversationColumn,
    Entity as ConversationEntity, Model as ConversationRow,
};
