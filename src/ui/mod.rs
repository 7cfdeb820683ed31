pub mod cube_view;
pub mod panels;
pub mod plot;
