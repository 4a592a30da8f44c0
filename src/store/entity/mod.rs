pub mod result;
pub mod task;

pub use result::{
    ActiveModel as ResultActiveModel, Column as ResultColumn, Entity as ResultEntity, Model as ResultModel,
};
pub use task::{ActiveModel as TaskActiveModel, Column as TaskColumn, Entity as TaskEntity, Model as TaskModel};
