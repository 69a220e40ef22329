pub mod appearance;
pub mod import;
pub mod playlist;
pub mod spotify;
pub mod tasks;
pub mod track;
