use std::sync::Arc;

use crate::database::Database;
use crate::services::tasks::TaskRunner;

pub struct AppState {
    pub db: Arc<Database>,
    pub task_runner: TaskRunner,
}
