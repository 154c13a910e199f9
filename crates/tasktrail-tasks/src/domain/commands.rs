//! Commands for the task context.

use tasktrail_core::acl::Principal;
use tasktrail_core::command::Command;

/// Command to create a task owned by the caller.
#[derive(Debug, Clone)]
pub struct CreateTask {
    /// Saga this command is a step of.
    pub saga_id: Option<String>,
    /// The caller; must be a user.
    pub principal: Principal,
    /// Task title.
    pub title: String,
    /// Task description.
    pub description: String,
}

impl Command for CreateTask {
    fn command_type(&self) -> &'static str {
        "tasks.create"
    }

    fn saga_id(&self) -> Option<&str> {
        self.saga_id.as_deref()
    }
}

/// Command to change a task's title and/or description.
#[derive(Debug, Clone)]
pub struct UpdateTask {
    /// Saga this command is a step of.
    pub saga_id: Option<String>,
    /// The caller.
    pub principal: Principal,
    /// The task identifier.
    pub id: String,
    /// New title, if changing.
    pub title: Option<String>,
    /// New description, if changing.
    pub description: Option<String>,
}

impl Command for UpdateTask {
    fn command_type(&self) -> &'static str {
        "tasks.update"
    }

    fn saga_id(&self) -> Option<&str> {
        self.saga_id.as_deref()
    }
}

/// Command to start work on a pending task.
#[derive(Debug, Clone)]
pub struct ProgressTask {
    /// Saga this command is a step of.
    pub saga_id: Option<String>,
    /// The caller.
    pub principal: Principal,
    /// The task identifier.
    pub id: String,
}

impl Command for ProgressTask {
    fn command_type(&self) -> &'static str {
        "tasks.progress"
    }

    fn saga_id(&self) -> Option<&str> {
        self.saga_id.as_deref()
    }
}

/// Command to complete a task in progress.
#[derive(Debug, Clone)]
pub struct CompleteTask {
    /// Saga this command is a step of.
    pub saga_id: Option<String>,
    /// The caller.
    pub principal: Principal,
    /// The task identifier.
    pub id: String,
}

impl Command for CompleteTask {
    fn command_type(&self) -> &'static str {
        "tasks.complete"
    }

    fn saga_id(&self) -> Option<&str> {
        self.saga_id.as_deref()
    }
}

/// Command to delete a task and revoke its ACL entries.
#[derive(Debug, Clone)]
pub struct DeleteTask {
    /// Saga this command is a step of.
    pub saga_id: Option<String>,
    /// The caller.
    pub principal: Principal,
    /// The task identifier.
    pub id: String,
}

impl Command for DeleteTask {
    fn command_type(&self) -> &'static str {
        "tasks.delete"
    }

    fn saga_id(&self) -> Option<&str> {
        self.saga_id.as_deref()
    }
}
