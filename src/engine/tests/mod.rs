pub mod helpers;

mod tests_boundaries;
mod tests_recall;
