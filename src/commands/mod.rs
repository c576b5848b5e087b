pub mod forecast;
pub mod list_dishes;
pub mod run;
pub mod train;
