//! Density-based clustering over incident point geometries.
//!
//! DBSCAN with an R-tree neighborhood index. Neighborhoods are found
//! with a conservative degree-radius query and confirmed with a
//! haversine distance check, so `epsilon` is a true ground distance in
//! meters regardless of latitude.

use std::collections::VecDeque;

use geo::{ConvexHull, MultiPoint, Point};
use rstar::RTree;
use rstar::primitives::GeomWithData;

use crate::{HotspotCluster, HotspotSet};

/// Approximate meters per degree of latitude.
const METERS_PER_DEGREE: f64 = 111_320.0;
/// Mean Earth radius in meters.
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

type TreePoint = GeomWithData<[f64; 2], usize>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Unvisited,
    Noise,
    Cluster(usize),
}

/// Runs DBSCAN over `(record_index, longitude, latitude)` points.
///
/// Points are visited in canonical coordinate order rather than input
/// order, so cluster membership depends only on the point set itself.
/// `min_points` counts the point's own position, matching the usual
/// DBSCAN convention.
#[allow(clippy::cast_precision_loss)]
pub fn dbscan(points: &[(usize, f64, f64)], epsilon_meters: f64, min_points: usize) -> HotspotSet {
    let positions: Vec<[f64; 2]> = points.iter().map(|&(_, lon, lat)| [lon, lat]).collect();
    let tree: RTree<TreePoint> = RTree::bulk_load(
        positions
            .iter()
            .enumerate()
            .map(|(i, &p)| TreePoint::new(p, i))
            .collect(),
    );

    let mut order: Vec<usize> = (0..positions.len()).collect();
    order.sort_unstable_by(|&a, &b| {
        positions[a][0]
            .total_cmp(&positions[b][0])
            .then_with(|| positions[a][1].total_cmp(&positions[b][1]))
    });

    let mut labels = vec![Label::Unvisited; positions.len()];
    let mut cluster_count = 0;

    for &seed in &order {
        if labels[seed] != Label::Unvisited {
            continue;
        }
        let neighbors = region_query(&tree, &positions, seed, epsilon_meters);
        if neighbors.len() < min_points {
            labels[seed] = Label::Noise;
            continue;
        }

        let id = cluster_count;
        cluster_count += 1;
        labels[seed] = Label::Cluster(id);

        let mut frontier: VecDeque<usize> = neighbors.into();
        while let Some(point) = frontier.pop_front() {
            match labels[point] {
                Label::Cluster(_) => continue,
                // A noise point in range of a core point becomes a
                // border member, but never seeds further expansion.
                Label::Noise => {
                    labels[point] = Label::Cluster(id);
                    continue;
                }
                Label::Unvisited => {}
            }
            labels[point] = Label::Cluster(id);
            let expansion = region_query(&tree, &positions, point, epsilon_meters);
            if expansion.len() >= min_points {
                frontier.extend(expansion);
            }
        }
    }

    let mut members_by_cluster: Vec<Vec<usize>> = vec![Vec::new(); cluster_count];
    let mut noise_count = 0;
    for (i, label) in labels.iter().enumerate() {
        match label {
            Label::Cluster(id) => members_by_cluster[*id].push(i),
            Label::Noise => noise_count += 1,
            Label::Unvisited => {}
        }
    }

    let clusters = members_by_cluster
        .into_iter()
        .enumerate()
        .map(|(id, mut member_slots)| {
            member_slots.sort_unstable_by_key(|&slot| points[slot].0);
            let coords: Vec<[f64; 2]> = member_slots.iter().map(|&slot| positions[slot]).collect();
            let n = coords.len() as f64;
            let centroid = [
                coords.iter().map(|c| c[0]).sum::<f64>() / n,
                coords.iter().map(|c| c[1]).sum::<f64>() / n,
            ];
            HotspotCluster {
                id,
                count: member_slots.len(),
                centroid,
                members: member_slots.iter().map(|&slot| points[slot].0).collect(),
                hull: convex_hull(&coords),
            }
        })
        .collect();

    HotspotSet {
        clusters,
        noise_count,
    }
}

/// Indices of all points within `epsilon_meters` of `center`, the
/// center itself included, in canonical coordinate order.
fn region_query(
    tree: &RTree<TreePoint>,
    positions: &[[f64; 2]],
    center: usize,
    epsilon_meters: f64,
) -> Vec<usize> {
    let [lon, lat] = positions[center];
    let lat_radius = epsilon_meters / METERS_PER_DEGREE;
    let lon_radius = epsilon_meters / (METERS_PER_DEGREE * lat.to_radians().cos().max(0.01));
    let degree_radius = lat_radius.max(lon_radius);

    let mut found: Vec<usize> = tree
        .locate_within_distance([lon, lat], degree_radius * degree_radius)
        .filter(|p| haversine_meters([lon, lat], *p.geom()) <= epsilon_meters)
        .map(|p| p.data)
        .collect();
    found.sort_unstable_by(|&a, &b| {
        positions[a][0]
            .total_cmp(&positions[b][0])
            .then_with(|| positions[a][1].total_cmp(&positions[b][1]))
    });
    found
}

fn haversine_meters(a: [f64; 2], b: [f64; 2]) -> f64 {
    let (lon_a, lat_a) = (a[0].to_radians(), a[1].to_radians());
    let (lon_b, lat_b) = (b[0].to_radians(), b[1].to_radians());
    let d_lat = lat_b - lat_a;
    let d_lon = lon_b - lon_a;
    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Convex hull of the member coordinates as a closed ring, or empty
/// when there are too few points to enclose an area.
fn convex_hull(coords: &[[f64; 2]]) -> Vec<[f64; 2]> {
    if coords.len() < 3 {
        return Vec::new();
    }
    let multipoint: MultiPoint<f64> = coords.iter().map(|&[x, y]| Point::new(x, y)).collect();
    let hull = multipoint.convex_hull();
    hull.exterior().coords().map(|c| [c.x, c.y]).collect()
}
