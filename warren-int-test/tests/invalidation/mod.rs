mod invalidation_test;
