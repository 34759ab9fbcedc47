/*
Copyright 2022 Jakub Lewandowski

This file is part of FLS Satellite Verification (fls-verif).

FLS Satellite Verification (fls-verif) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

FLS Satellite Verification (fls-verif) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with FLS Satellite Verification (fls-verif). If not, see https://www.gnu.org/licenses/.
*/

//! Module building the boolean mask of the region of interest
//! on the observation grid.
//!
//! Gridpoints are selected with the even-odd (ray casting) rule.
//! Points lying exactly on the polygon boundary (including vertices)
//! are treated as inside.

use crate::{errors::RegionError, Float};
use ndarray::{ArrayD, ArrayViewD, Zip};

/// Closed polygon in geographic coordinates.
#[derive(Clone, PartialEq, Debug)]
pub struct Polygon {
    /// `(lat, lon)` vertices, without repeating the first one at the end.
    vertices: Vec<(Float, Float)>,
    lat_range: (Float, Float),
    lon_range: (Float, Float),
}

impl Polygon {
    pub fn new(vertices: &[(Float, Float)]) -> Result<Self, RegionError> {
        let mut vertices = vertices.to_vec();

        // explicit closing vertex is redundant
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }

        if vertices.len() < 3 {
            return Err(RegionError::DegeneratePolygon(vertices.len()));
        }

        let lat_range = vertices
            .iter()
            .fold((Float::INFINITY, Float::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v.0), hi.max(v.0))
            });
        let lon_range = vertices
            .iter()
            .fold((Float::INFINITY, Float::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v.1), hi.max(v.1))
            });

        Ok(Polygon {
            vertices,
            lat_range,
            lon_range,
        })
    }

    /// Checks if the point is inside the polygon or on its boundary.
    pub fn contains(&self, lat: Float, lon: Float) -> bool {
        if lat < self.lat_range.0
            || lat > self.lat_range.1
            || lon < self.lon_range.0
            || lon > self.lon_range.1
            || lat.is_nan()
            || lon.is_nan()
        {
            return false;
        }

        let n = self.vertices.len();
        let mut inside = false;

        for i in 0..n {
            let a = self.vertices[i];
            let b = self.vertices[(i + 1) % n];

            if on_segment((lat, lon), a, b) {
                return true;
            }

            // edge crosses the horizontal ray going east from the point
            if (a.0 > lat) != (b.0 > lat) {
                let lon_cross = a.1 + (lat - a.0) * (b.1 - a.1) / (b.0 - a.0);

                if lon < lon_cross {
                    inside = !inside;
                }
            }
        }

        inside
    }
}

fn on_segment(p: (Float, Float), a: (Float, Float), b: (Float, Float)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);

    if cross != 0.0 {
        return false;
    }

    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

/// Computes for every gridpoint whether it lies within the polygon.
///
/// Works for grids of any dimensionality, the returned mask
/// has the same shape as the coordinate arrays.
pub fn build_mask(
    lats: ArrayViewD<Float>,
    lons: ArrayViewD<Float>,
    polygon: &Polygon,
) -> Result<ArrayD<bool>, RegionError> {
    if lats.shape() != lons.shape() {
        return Err(RegionError::ShapeMismatch(
            lats.shape().to_vec(),
            lons.shape().to_vec(),
        ));
    }

    let mask = Zip::from(&lats)
        .and(&lons)
        .map_collect(|&lat, &lon| polygon.contains(lat, lon));

    Ok(mask)
}

/// Mask of the region of interest together with the count
/// of selected gridpoints, which is the denominator of all fractions.
#[derive(Clone, PartialEq, Debug)]
pub struct GeoMask {
    mask: ArrayD<bool>,
    region_size: usize,
}

impl GeoMask {
    /// Builds the mask and checks that the region is not empty.
    pub fn new(
        lats: ArrayViewD<Float>,
        lons: ArrayViewD<Float>,
        polygon: &Polygon,
    ) -> Result<Self, RegionError> {
        let mask = build_mask(lats, lons, polygon)?;
        let region_size = mask.iter().filter(|&&m| m).count();

        if region_size == 0 {
            return Err(RegionError::NoGridPoints);
        }

        Ok(GeoMask { mask, region_size })
    }

    pub fn region_size(&self) -> usize {
        self.region_size
    }

    pub fn shape(&self) -> &[usize] {
        self.mask.shape()
    }

    /// Counts region gridpoints of `field` for which `predicate` holds.
    ///
    /// `field` must have the shape of the mask.
    pub fn count_where<F>(&self, field: ArrayViewD<Float>, predicate: F) -> usize
    where
        F: Fn(Float) -> bool,
    {
        Zip::from(&self.mask)
            .and(&field)
            .fold(0, |acc, &inside, &value| {
                if inside && predicate(value) {
                    acc + 1
                } else {
                    acc
                }
            })
    }

    /// Fraction of region gridpoints of `field` for which `predicate` holds.
    pub fn fraction_where<F>(&self, field: ArrayViewD<Float>, predicate: F) -> Float
    where
        F: Fn(Float) -> bool,
    {
        self.count_where(field, predicate) as Float / self.region_size as Float
    }
}

#[cfg(test)]
mod tests {
    use super::{build_mask, GeoMask, Polygon};
    use crate::constants::SWISS_PLATEAU;
    use crate::errors::RegionError;
    use float_cmp::approx_eq;
    use ndarray::{arr1, arr2, ArrayD, IxDyn};
    use proptest::prelude::*;

    fn square() -> Polygon {
        Polygon::new(&[(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0)]).unwrap()
    }

    #[test]
    fn swiss_plateau_points() {
        let polygon = Polygon::new(&SWISS_PLATEAU).unwrap();

        // Bern
        assert!(polygon.contains(46.95, 7.45));
        // Zurich
        assert!(polygon.contains(47.37, 8.54));
        // Lugano
        assert!(!polygon.contains(46.00, 8.95));
        // Sion (Valais)
        assert!(!polygon.contains(46.23, 7.36));
        assert!(!polygon.contains(0.0, 0.0));
    }

    #[test]
    fn boundary_is_inside() {
        let polygon = Polygon::new(&SWISS_PLATEAU).unwrap();
        let (lat, lon) = SWISS_PLATEAU[0];

        assert!(polygon.contains(lat, lon));

        let square = square();
        assert!(square.contains(0.0, 1.0));
        assert!(square.contains(2.0, 2.0));
        assert!(square.contains(1.0, 0.0));
        assert!(!square.contains(2.0, 2.1));
    }

    #[test]
    fn closed_input_polygon() {
        let open = square();
        let closed =
            Polygon::new(&[(0.0, 0.0), (0.0, 2.0), (2.0, 2.0), (2.0, 0.0), (0.0, 0.0)]).unwrap();

        assert_eq!(open, closed);
    }

    #[test]
    fn degenerate_polygon() {
        let result = Polygon::new(&[(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]);

        assert!(matches!(result, Err(RegionError::DegeneratePolygon(2))));
    }

    #[test]
    fn mask_of_2d_grid() {
        let lats = arr2(&[[0.5, 0.5, 0.5], [1.5, 1.5, 1.5]]).into_dyn();
        let lons = arr2(&[[0.5, 1.5, 2.5], [0.5, 1.5, 2.5]]).into_dyn();

        let mask = build_mask(lats.view(), lons.view(), &square()).unwrap();

        assert_eq!(
            mask,
            arr2(&[[true, true, false], [true, true, false]]).into_dyn()
        );
    }

    #[test]
    fn mismatched_coords() {
        let lats = arr1(&[0.5, 0.5]).into_dyn();
        let lons = arr1(&[0.5, 1.5, 2.5]).into_dyn();

        let result = build_mask(lats.view(), lons.view(), &square());

        assert!(matches!(result, Err(RegionError::ShapeMismatch(_, _))));
    }

    #[test]
    fn empty_region() {
        let lats = arr1(&[5.0, 6.0]).into_dyn();
        let lons = arr1(&[5.0, 6.0]).into_dyn();

        let result = GeoMask::new(lats.view(), lons.view(), &square());

        assert!(matches!(result, Err(RegionError::NoGridPoints)));
    }

    #[test]
    fn masked_fraction() {
        let lats = arr2(&[[0.5, 0.5], [1.5, 9.0]]).into_dyn();
        let lons = arr2(&[[0.5, 1.5], [0.5, 9.0]]).into_dyn();
        let field = arr2(&[[1.0, f64::NAN], [0.0, 1.0]]).into_dyn();

        let mask = GeoMask::new(lats.view(), lons.view(), &square()).unwrap();

        assert_eq!(mask.region_size(), 3);
        assert_eq!(mask.count_where(field.view(), |v| v > 0.5), 1);
        assert!(approx_eq!(
            f64,
            mask.fraction_where(field.view(), |v| v.is_nan()),
            1.0 / 3.0
        ));
    }

    fn grid_strategy() -> impl Strategy<Value = (Vec<usize>, Vec<f64>, Vec<f64>)> {
        prop::collection::vec(1usize..6, 1..4).prop_flat_map(|shape| {
            let len = shape.iter().product::<usize>();
            (
                Just(shape),
                prop::collection::vec(-1.0f64..3.0, len),
                prop::collection::vec(-1.0f64..3.0, len),
            )
        })
    }

    proptest! {
        #[test]
        fn mask_keeps_shape_and_is_deterministic((shape, lats, lons) in grid_strategy()) {
            let lats = ArrayD::from_shape_vec(IxDyn(&shape), lats).unwrap();
            let lons = ArrayD::from_shape_vec(IxDyn(&shape), lons).unwrap();
            let polygon = square();

            let first = build_mask(lats.view(), lons.view(), &polygon).unwrap();
            let second = build_mask(lats.view(), lons.view(), &polygon).unwrap();

            prop_assert_eq!(first.shape(), lats.shape());
            prop_assert_eq!(first, second);
        }

        #[test]
        fn fractions_are_bounded(
            (shape, lats, lons) in grid_strategy(),
            threshold in 0.0f64..1.0,
        ) {
            let lats = ArrayD::from_shape_vec(IxDyn(&shape), lats).unwrap();
            let field: Vec<f64> = lons.clone().into_iter().map(|v| (v + 1.0) / 4.0).collect();
            let field = ArrayD::from_shape_vec(IxDyn(&shape), field).unwrap();
            let lons = ArrayD::from_shape_vec(IxDyn(&shape), lons).unwrap();

            if let Ok(mask) = GeoMask::new(lats.view(), lons.view(), &square()) {
                let fraction = mask.fraction_where(field.view(), |v| v > threshold);
                prop_assert!((0.0..=1.0).contains(&fraction));
            }
        }
    }
}
