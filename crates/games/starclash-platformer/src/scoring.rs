/// Points awarded for a special kill as part of a combo.
///
/// Scoring: 100, 200, 400, 500, 800, 1000, 2000, 4000, 5000, 8000, then 8000
/// for every further hit.
pub fn combo_score(combo: u32) -> u32 {
    match combo {
        0 => 100,
        1 => 200,
        2 => 400,
        3 => 500,
        4 => 800,
        5 => 1000,
        6 => 2000,
        7 => 4000,
        8 => 5000,
        _ => 8000,
    }
}
