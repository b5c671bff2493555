pub mod course;
pub mod instructor;
pub mod lesson;
pub mod sub_request;

pub use course::{Course, CourseFlags, NewCourseRequest};
pub use instructor::{Instructor, NewInstructorRequest, UpdateInstructorRequest};
pub use lesson::{
    AssignmentFlags, Lesson, LessonAssignment, NewLessonRequest, UpdateLessonRequest,
};
pub use sub_request::{NewSubRequest, SubRequest};
