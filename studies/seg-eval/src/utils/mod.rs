pub mod colormap;
pub mod confusion;
pub mod heatmap;
pub mod images;
pub mod losses;
