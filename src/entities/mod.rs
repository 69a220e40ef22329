pub mod appearance;
pub mod playlist;
pub mod playlist_membership_cache;
pub mod spotify_token;
pub mod task_status;
pub mod track;
