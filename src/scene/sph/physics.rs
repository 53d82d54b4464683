//! Smoothed particle hydrodynamics in two dimensions. The compute shaders and the reference
//! kernels both follow these functions, one particle per invocation.

use std::f32::consts::PI;

use ultraviolet::Vec2;

pub const PARTICLE_RADIUS: f32 = 0.005;
pub const REST_DENSITY: f32 = 1000.0;
pub const PARTICLE_MASS: f32 = 0.02;
pub const SMOOTHING_LENGTH: f32 = 4.0 * PARTICLE_RADIUS;
pub const STIFFNESS: f32 = 1000.0;
pub const VISCOSITY: f32 = 500.0;
pub const GRAVITY: [f32; 2] = [0.0, -9806.65];
pub const TIME_STEP: f32 = 1e-4;
pub const WALL_DAMPING: f32 = 0.3;

fn poly6(distance_sq: f32) -> f32 {
    let h2 = SMOOTHING_LENGTH * SMOOTHING_LENGTH;
    if distance_sq >= h2 {
        return 0.0;
    }
    315.0 / (64.0 * PI * SMOOTHING_LENGTH.powi(9)) * (h2 - distance_sq).powi(3)
}

fn spiky_gradient(distance: f32) -> f32 {
    -45.0 / (PI * SMOOTHING_LENGTH.powi(6)) * (SMOOTHING_LENGTH - distance).powi(2)
}

fn viscosity_laplacian(distance: f32) -> f32 {
    45.0 / (PI * SMOOTHING_LENGTH.powi(6)) * (SMOOTHING_LENGTH - distance)
}

/// What one particle exposes to its neighbours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleSample {
    pub position: Vec2,
    pub velocity: Vec2,
    pub density: f32,
    pub pressure: f32,
}

/// Density at particle `index`, summed over all `count` particles including itself.
pub fn density(index: usize, count: usize, mut position: impl FnMut(usize) -> Vec2) -> f32 {
    let center = position(index);
    let mut density = 0.0;
    for other in 0..count {
        density += PARTICLE_MASS * poly6((center - position(other)).mag_sq());
    }
    density
}

pub fn pressure(density: f32) -> f32 {
    STIFFNESS * (density - REST_DENSITY)
}

/// Pressure, viscosity and gravity acting on particle `index`.
pub fn force(index: usize, count: usize, mut sample: impl FnMut(usize) -> ParticleSample) -> Vec2 {
    let me = sample(index);
    let mut pressure_force = Vec2::zero();
    let mut viscosity_force = Vec2::zero();
    for other_index in 0..count {
        if other_index == index {
            continue;
        }
        let other = sample(other_index);
        let delta = me.position - other.position;
        let distance = delta.mag();
        // Coinciding particles have no direction to push along
        if distance >= SMOOTHING_LENGTH || distance == 0.0 || other.density <= 0.0 {
            continue;
        }
        pressure_force += -delta / distance * PARTICLE_MASS * (me.pressure + other.pressure)
            / (2.0 * other.density)
            * spiky_gradient(distance);
        viscosity_force += (other.velocity - me.velocity) * PARTICLE_MASS / other.density
            * viscosity_laplacian(distance);
    }
    viscosity_force *= VISCOSITY;
    pressure_force + viscosity_force + Vec2::from(GRAVITY) * me.density
}

/// Symplectic Euler step, clamped to the [-1, 1] box.
pub fn integrate(particle: ParticleSample, force: Vec2) -> (Vec2, Vec2) {
    let mut velocity = particle.velocity;
    if particle.density > 0.0 {
        velocity += force / particle.density * TIME_STEP;
    }
    let mut position = particle.position + velocity * TIME_STEP;

    if position.x < -1.0 {
        position.x = -1.0;
        velocity.x *= -WALL_DAMPING;
    } else if position.x > 1.0 {
        position.x = 1.0;
        velocity.x *= -WALL_DAMPING;
    }
    if position.y < -1.0 {
        position.y = -1.0;
        velocity.y *= -WALL_DAMPING;
    } else if position.y > 1.0 {
        position.y = 1.0;
        velocity.y *= -WALL_DAMPING;
    }
    (position, velocity)
}

/// Sequential reference of one simulation step, phase after phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleSystem {
    pub positions: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
    pub forces: Vec<Vec2>,
    pub densities: Vec<f32>,
    pub pressures: Vec<f32>,
}

impl ParticleSystem {
    /// Particles at rest at the given positions.
    pub fn new(positions: &[[f32; 2]]) -> Self {
        let count = positions.len();
        Self {
            positions: positions.iter().copied().map(Vec2::from).collect(),
            velocities: vec![Vec2::zero(); count],
            forces: vec![Vec2::zero(); count],
            densities: vec![0.0; count],
            pressures: vec![0.0; count],
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn sample(&self, index: usize) -> ParticleSample {
        ParticleSample {
            position: self.positions[index],
            velocity: self.velocities[index],
            density: self.densities[index],
            pressure: self.pressures[index],
        }
    }

    pub fn step(&mut self) {
        let count = self.len();
        for index in 0..count {
            let density = density(index, count, |other| self.positions[other]);
            self.densities[index] = density;
            self.pressures[index] = pressure(density);
        }
        for index in 0..count {
            self.forces[index] = force(index, count, |other| self.sample(other));
        }
        for index in 0..count {
            let (position, velocity) = integrate(self.sample(index), self.forces[index]);
            self.positions[index] = position;
            self.velocities[index] = velocity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lone_particle_only_feels_gravity() {
        let mut system = ParticleSystem::new(&[[0.0, 0.0]]);
        system.step();

        assert!((system.densities[0] - PARTICLE_MASS * poly6(0.0)).abs() < 1e-3);
        assert_eq!(system.forces[0].x, 0.0);
        assert!(system.forces[0].y < 0.0);
        assert!(system.positions[0].y < 0.0);
        assert_eq!(system.positions[0].x, 0.0);
    }

    #[test]
    fn close_particles_push_apart_under_pressure() {
        let spacing = PARTICLE_RADIUS;
        let mut system = ParticleSystem::new(&[[-spacing, 0.5], [spacing, 0.5]]);
        system.step();
        // Squeezed this close, both are above rest density
        assert!(system.pressures[0] > 0.0);
        assert!(system.forces[0].x < 0.0);
        assert_eq!(system.forces[0].x, -system.forces[1].x);
    }

    #[test]
    fn walls_clamp_and_damp() {
        let particle = ParticleSample {
            position: Vec2::new(0.99995, -0.99995),
            velocity: Vec2::new(10.0, -10.0),
            density: 0.0,
            pressure: 0.0,
        };
        let (position, velocity) = integrate(particle, Vec2::zero());
        assert_eq!(position, Vec2::new(1.0, -1.0));
        assert!((velocity.x + 10.0 * WALL_DAMPING).abs() < 1e-5);
        assert!((velocity.y - 10.0 * WALL_DAMPING).abs() < 1e-5);
    }

    #[test]
    fn kernels_vanish_at_the_smoothing_length() {
        assert_eq!(poly6(SMOOTHING_LENGTH * SMOOTHING_LENGTH), 0.0);
        assert_eq!(spiky_gradient(SMOOTHING_LENGTH), 0.0);
        assert_eq!(viscosity_laplacian(SMOOTHING_LENGTH), 0.0);
    }
}
