pub mod media;

pub use media::MediaRepository;
