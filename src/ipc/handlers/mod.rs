pub mod attendance;
pub mod core;
pub mod enrollment;
pub mod exams;
pub mod fees;
pub mod marks;
pub mod offerings;
pub mod promotion;
pub mod setup;
pub mod timetable;
pub mod users;
