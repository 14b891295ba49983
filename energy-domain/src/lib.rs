pub mod domain;

pub use domain::{
    iso_date, CityProfile, DateWindow, EnergyReading, EnergyRecord, EnergyRoute, MergedRecord,
    WeatherRecord, WindowError,
};
